//! Cross-module and concurrency integration tests. Each test drives the
//! crate's own framed binary protocol directly over a loopback
//! `TcpStream` against a real `Dispatcher`, the way the teacher's own
//! `tests/server.rs` drives `tokio_postgres` against a spawned server —
//! except here the client side is the protocol itself, so there is no
//! off-the-shelf driver to borrow.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use meridiandb::config::ServerConfig;
use meridiandb::dispatch::Dispatcher;
use meridiandb::net::conn::{pack_handshake_request, HandshakeRequest};
use meridiandb::net::Connection;
use meridiandb::session::TableDef;
use meridiandb::typecheck::{Literal, Tag};
use meridiandb::wire::Value;

/// Binds a real listener and runs the same accept/dispatch loop as
/// `server/main.rs`, one task per connection. Returns the address and a
/// handle to the `Dispatcher` so tests can seed tables directly (there is
/// no request code for schema definition — catalog is a non-goal).
async fn spawn_server() -> (std::net::SocketAddr, Arc<Dispatcher>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(ServerConfig::default())));
    let accept_dispatcher = dispatcher.clone();
    let host = addr.to_string();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let dispatcher = accept_dispatcher.clone();
            let host = host.clone();
            tokio::spawn(async move {
                let mut conn = Connection::new(socket, host);
                loop {
                    let pdu = match conn.read_pdu().await {
                        Ok(pdu) => pdu,
                        Err(_) => return,
                    };
                    if dispatcher.dispatch(&mut conn, pdu).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    (addr, dispatcher)
}

async fn connect(addr: std::net::SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

/// `u32 request_code, u32 rid, u32 payload_len, payload`.
async fn send_request(stream: &mut TcpStream, code: u32, rid: u32, payload: &[u8]) {
    let mut header = BytesMut::with_capacity(12);
    header.put_u32(code);
    header.put_u32(rid);
    header.put_u32(payload.len() as u32);
    stream.write_all(&header).await.unwrap();
    if !payload.is_empty() {
        stream.write_all(payload).await.unwrap();
    }
}

/// `u32 rid, u32 len, body`.
async fn recv_reply(stream: &mut TcpStream) -> (u32, Bytes) {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).await.unwrap();
    let mut h = Bytes::copy_from_slice(&header);
    let rid = h.get_u32();
    let len = h.get_u32() as usize;
    let mut body = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut body).await.unwrap();
    }
    (rid, Bytes::from(body))
}

fn pack_string(buf: &mut BytesMut, s: &str) {
    meridiandb::wire::pack_string(buf, Some(s));
}

async fn handshake(stream: &mut TcpStream, rid: u32) {
    let req = HandshakeRequest {
        client_release: "10.3".into(),
        client_capabilities: 1,
        client_bit_platform: 64,
        client_host: "itest".into(),
    };
    let mut buf = BytesMut::new();
    pack_handshake_request(&mut buf, &req);
    send_request(stream, 0, rid, &buf).await;
    let (got_rid, _reply) = recv_reply(stream).await;
    assert_eq!(got_rid, rid);
}

async fn session_open(stream: &mut TcpStream, rid: u32) -> i32 {
    let mut buf = BytesMut::new();
    buf.put_i32(0);
    send_request(stream, 1, rid, &buf).await;
    let (_, mut reply) = recv_reply(stream).await;
    reply.get_i32()
}

fn pack_host_vars(buf: &mut BytesMut, vars: &[Value]) {
    buf.put_i32(vars.len() as i32);
    for v in vars {
        v.pack(buf);
    }
}

struct CompileReply {
    position: i32,
    column_types: Vec<u8>,
}

async fn compile(stream: &mut TcpStream, rid: u32, session_id: i32, sql: &str) -> CompileReply {
    let mut buf = BytesMut::new();
    buf.put_i32(session_id);
    pack_string(&mut buf, sql);
    send_request(stream, 3, rid, &buf).await;
    let (_, mut reply) = recv_reply(stream).await;
    let position = reply.get_i32();
    let _stmt_type = reply.get_u8();
    let count = reply.get_i32();
    let mut column_types = Vec::with_capacity(count as usize);
    for _ in 0..count {
        column_types.push(reply.get_u8());
    }
    CompileReply { position, column_types }
}

struct ExecuteReply {
    query_id: i64,
    first_page: Option<Vec<Value>>,
}

fn unpack_row(buf: &mut Bytes) -> Vec<Value> {
    let count = buf.get_i32();
    let mut row = Vec::with_capacity(count as usize);
    for _ in 0..count {
        row.push(Value::unpack(buf).unwrap());
    }
    row
}

async fn execute(
    stream: &mut TcpStream,
    rid: u32,
    session_id: i32,
    position: i32,
    host_vars: &[Value],
    is_async: bool,
) -> ExecuteReply {
    let mut buf = BytesMut::new();
    buf.put_i32(session_id);
    buf.put_i32(position);
    pack_host_vars(&mut buf, host_vars);
    buf.put_u8(if is_async { 1 } else { 0 });
    buf.put_i64(-1);
    send_request(stream, 4, rid, &buf).await;
    let (_, mut reply) = recv_reply(stream).await;
    let query_id = reply.get_i64();
    let _list_id = reply.get_i32();
    let _server_cache_time = reply.get_i64();
    let has_first = reply.get_u8();
    let first_page = if has_first == 1 { Some(unpack_row(&mut reply)) } else { None };
    ExecuteReply { query_id, first_page }
}

async fn get_list_file_page(stream: &mut TcpStream, rid: u32, query_id: i64, pageid: i32) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i64(query_id);
    buf.put_i32(0);
    buf.put_i32(pageid);
    send_request(stream, 10, rid, &buf).await;
    recv_reply(stream).await.1
}

async fn end_query(stream: &mut TcpStream, rid: u32, query_id: i64) {
    let mut buf = BytesMut::new();
    buf.put_i64(query_id);
    send_request(stream, 11, rid, &buf).await;
    recv_reply(stream).await;
}

async fn interrupt(stream: &mut TcpStream, rid: u32, query_id: i64) {
    let mut buf = BytesMut::new();
    buf.put_i64(query_id);
    send_request(stream, 13, rid, &buf).await;
    recv_reply(stream).await;
}

async fn prepare(stream: &mut TcpStream, rid: u32, session_id: i32, name: &str, sql: &str) {
    let mut buf = BytesMut::new();
    buf.put_i32(session_id);
    pack_string(&mut buf, name);
    pack_string(&mut buf, sql);
    send_request(stream, 7, rid, &buf).await;
    recv_reply(stream).await;
}

async fn execute_prepared(
    stream: &mut TcpStream,
    rid: u32,
    session_id: i32,
    name: &str,
    host_vars: &[Value],
) -> ExecuteReply {
    let mut buf = BytesMut::new();
    buf.put_i32(session_id);
    pack_string(&mut buf, name);
    pack_host_vars(&mut buf, host_vars);
    buf.put_u8(0);
    buf.put_i64(-1);
    send_request(stream, 8, rid, &buf).await;
    let (_, mut reply) = recv_reply(stream).await;
    let query_id = reply.get_i64();
    let _list_id = reply.get_i32();
    let _server_cache_time = reply.get_i64();
    let has_first = reply.get_u8();
    let first_page = if has_first == 1 { Some(unpack_row(&mut reply)) } else { None };
    ExecuteReply { query_id, first_page }
}

async fn deallocate(stream: &mut TcpStream, rid: u32, session_id: i32, name: &str) -> i32 {
    let mut buf = BytesMut::new();
    buf.put_i32(session_id);
    pack_string(&mut buf, name);
    send_request(stream, 9, rid, &buf).await;
    let (_, mut reply) = recv_reply(stream).await;
    if reply.remaining() >= 4 {
        reply.get_i32()
    } else {
        0
    }
}

async fn commit_or_abort(
    stream: &mut TcpStream,
    rid: u32,
    code: u32,
    has_updated: bool,
    ha_state: u8,
    client_kind: u8,
) -> bool {
    let mut buf = BytesMut::new();
    buf.put_u8(has_updated as u8);
    buf.put_u8(ha_state);
    buf.put_u8(client_kind);
    send_request(stream, code, rid, &buf).await;
    let (_, mut reply) = recv_reply(stream).await;
    reply.get_u8() != 0
}

#[tokio::test]
async fn compile_execute_over_the_wire_against_a_registered_table() {
    let (addr, dispatcher) = spawn_server().await;
    let mut stream = connect(addr).await;
    handshake(&mut stream, 1).await;
    let session_id = session_open(&mut stream, 2).await;

    dispatcher
        .register_table(
            session_id,
            "accounts",
            TableDef {
                columns: vec![("balance".into(), Tag::Integer)],
                rows: vec![vec![Literal::Integer(100)], vec![Literal::Integer(250)]],
            },
        )
        .unwrap();

    let compiled = compile(&mut stream, 3, session_id, "SELECT balance FROM accounts WHERE balance = ?").await;
    assert_eq!(compiled.position, 1);
    assert_eq!(compiled.column_types, vec![Tag::Integer as u8]);

    let outcome = execute(&mut stream, 4, session_id, compiled.position, &[Value::Integer(250)], false).await;
    assert_eq!(outcome.first_page, Some(vec![Value::Integer(250)]));
}

/// Scenario: start an async `SELECT` whose result spans more pages than
/// the membuf holds, interrupt after consuming a couple of pages, and
/// confirm the next `get_list_file_page` reports the query as done rather
/// than blocking forever or handing back a stale page — then confirm
/// `end_query` makes the id unusable (spec.md §8 scenario 5).
#[tokio::test]
async fn async_execute_interrupt_then_end_query() {
    let (addr, dispatcher) = spawn_server().await;
    let mut stream = connect(addr).await;
    handshake(&mut stream, 1).await;
    let session_id = session_open(&mut stream, 2).await;

    let rows: Vec<Vec<Literal>> = (0..20).map(|n| vec![Literal::Integer(n)]).collect();
    dispatcher
        .register_table(session_id, "wide", TableDef { columns: vec![("n".into(), Tag::Integer)], rows })
        .unwrap();

    let compiled = compile(&mut stream, 3, session_id, "SELECT n FROM wide").await;
    let outcome = execute(&mut stream, 4, session_id, compiled.position, &[], true).await;
    assert_eq!(outcome.first_page, Some(vec![Value::Integer(0)]));

    let mut page = get_list_file_page(&mut stream, 5, outcome.query_id, 1).await;
    assert_eq!(unpack_row(&mut page), vec![Value::Integer(1)]);
    page = get_list_file_page(&mut stream, 6, outcome.query_id, 2).await;
    assert_eq!(unpack_row(&mut page), vec![Value::Integer(2)]);

    interrupt(&mut stream, 7, outcome.query_id).await;

    // The in-memory producer runs to completion almost immediately, so by
    // the time `interrupt` reaches it the race could go either way — it
    // may have stopped mid-stream or already posted every row. Asking for
    // an index past the 20 rows the table actually has sidesteps that
    // race: the temp-file pool reports "interrupted" for both a real
    // mid-stream interrupt and "producer finished, that index never
    // arrived" (tfile::TempFile::get_page), so this is INTERRUPTED either
    // way without depending on timing.
    let mut tail = get_list_file_page(&mut stream, 8, outcome.query_id, 100).await;
    assert_eq!(tail.get_i32(), 32, "expected the INTERRUPTED error code");

    end_query(&mut stream, 9, outcome.query_id).await;
    let mut after_end = get_list_file_page(&mut stream, 10, outcome.query_id, 0).await;
    assert_eq!(after_end.get_i32(), 1, "expected INVALID_SESSION once the query entry is gone");
}

/// Scenario: `PREPARE` / `EXECUTE ... USING` / `DEALLOCATE` round trip
/// over the wire, with metadata still answerable by name after dealloc
/// fails the next execute (spec.md §8 scenario 2).
#[tokio::test]
async fn prepare_execute_deallocate_over_the_wire() {
    let (addr, _dispatcher) = spawn_server().await;
    let mut stream = connect(addr).await;
    handshake(&mut stream, 1).await;
    let session_id = session_open(&mut stream, 2).await;

    prepare(&mut stream, 3, session_id, "p1", "SELECT ? + 1").await;
    let first = execute_prepared(&mut stream, 4, session_id, "p1", &[Value::Integer(41)]).await;
    assert_eq!(first.first_page, Some(vec![Value::Integer(42)]));

    deallocate(&mut stream, 5, session_id, "p1").await;

    // The name is gone: the next EXECUTE on it reports PREPARED_NAME_NOT_FOUND.
    let mut buf = BytesMut::new();
    buf.put_i32(session_id);
    pack_string(&mut buf, "p1");
    pack_host_vars(&mut buf, &[Value::Integer(41)]);
    buf.put_u8(0);
    buf.put_i64(-1);
    send_request(&mut stream, 8, 6, &buf).await;
    let (_, mut reply) = recv_reply(&mut stream).await;
    assert_eq!(reply.get_i32(), 14, "expected PREPARED_NAME_NOT_FOUND");
}

/// Drives the `reset_on_commit` five-way decision through the real
/// Commit/Abort handlers rather than calling `decide_reset_on_commit`
/// directly, confirming the wire-level `u8` reply matches the table
/// (spec.md §4.3, §8 scenario 6).
#[tokio::test]
async fn commit_and_abort_share_the_reset_on_commit_table_over_the_wire() {
    let (addr, _dispatcher) = spawn_server().await;
    let mut stream = connect(addr).await;
    handshake(&mut stream, 1).await;

    // (ToBeStandby, Normal): reset iff has_updated.
    assert!(commit_or_abort(&mut stream, 2, 14, true, 1, 0).await);
    assert!(!commit_or_abort(&mut stream, 3, 15, false, 1, 0).await);

    // (Active, SlaveOnlyBroker): always reset, regardless of has_updated.
    assert!(commit_or_abort(&mut stream, 4, 14, false, 0, 2).await);

    // (Active, Normal): never reset.
    assert!(!commit_or_abort(&mut stream, 5, 15, true, 0, 0).await);
}
