//! Request dispatcher (C3): for each request code, decode arguments with
//! C1, drive the corresponding session/query-manager routine, and pack +
//! send the reply with C2. See spec.md §4.3 and SPEC_FULL §4.3.
//!
//! `Dispatcher` owns the process-wide plan cache and query manager (spec.md
//! §5: both are shared across every session on the process) plus the
//! table of live sessions, keyed by the session id the client was handed
//! by `SessionOpen`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, error, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::net::conn::{
    pack_handshake_reply, unpack_handshake_request, Connection, HandshakeReply,
};
use crate::net::{PushTag, RequestPdu};
use crate::plan::InMemoryExecutor;
use crate::qmgr::{literal_to_wire, wire_to_literal, ExecFlags, ExecuteOutcome, QueryId, QueryManager};
use crate::session::{Session, StatementType, TableDef};
use crate::typecheck::{Literal, Tag};
use crate::wire::{pack_string, unpack_string, Value};
use crate::xasl::PlanCache;

pub type SessionId = u32;

/// Request codes the dispatch table recognizes, one per handler named in
/// spec.md §4.3/§4.4/§4.7 plus the large-object and backup/dump special
/// handlers (SPEC_FULL §4.3 supplement names these as forwarding
/// handlers over an opaque sink, not full storage-engine features).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RequestCode {
    Handshake = 0,
    SessionOpen = 1,
    SessionClose = 2,
    Compile = 3,
    Execute = 4,
    DropStatement = 5,
    DropAllStatements = 6,
    Prepare = 7,
    ExecutePrepared = 8,
    Deallocate = 9,
    GetListFilePage = 10,
    EndQuery = 11,
    SyncQuery = 12,
    Interrupt = 13,
    Commit = 14,
    Abort = 15,
    LobRead = 16,
    LobWrite = 17,
    BackupDump = 18,
}

impl RequestCode {
    pub fn from_u32(v: u32) -> Result<RequestCode> {
        Ok(match v {
            0 => RequestCode::Handshake,
            1 => RequestCode::SessionOpen,
            2 => RequestCode::SessionClose,
            3 => RequestCode::Compile,
            4 => RequestCode::Execute,
            5 => RequestCode::DropStatement,
            6 => RequestCode::DropAllStatements,
            7 => RequestCode::Prepare,
            8 => RequestCode::ExecutePrepared,
            9 => RequestCode::Deallocate,
            10 => RequestCode::GetListFilePage,
            11 => RequestCode::EndQuery,
            12 => RequestCode::SyncQuery,
            13 => RequestCode::Interrupt,
            14 => RequestCode::Commit,
            15 => RequestCode::Abort,
            16 => RequestCode::LobRead,
            17 => RequestCode::LobWrite,
            18 => RequestCode::BackupDump,
            other => return Err(ServerError::Generic(format!("unknown request code {other}"))),
        })
    }
}

/// HA server state, one of the inputs to the commit/abort `reset_on_commit`
/// decision table (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaState {
    Active,
    ToBeStandby,
    Standby,
}

/// Client kind, the other input to the same decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Normal,
    Broker,
    SlaveOnlyBroker,
}

/// The five-way `reset_on_commit` decision, shared verbatim by commit and
/// abort (`stran_server_commit`/`stran_server_abort` are byte-for-byte
/// identical on this point in the original — SPEC_FULL §4.3). The
/// `(Standby, Normal)` row additionally clears the connection's latch,
/// which is the caller's responsibility once this returns `true`.
pub fn decide_reset_on_commit(
    has_updated: bool,
    ha_state: HaState,
    client_kind: ClientKind,
    latch_was_set: bool,
) -> bool {
    match (ha_state, client_kind) {
        (HaState::ToBeStandby, ClientKind::Normal) => has_updated,
        (HaState::Standby, ClientKind::Normal) => latch_was_set,
        (HaState::Active, ClientKind::SlaveOnlyBroker) => true,
        (HaState::Standby, ClientKind::Broker) => true,
        _ => false,
    }
}

/// Stable numeric error codes packed onto the wire ahead of the message
/// text, one per `ServerError` variant family (spec.md §7's four error
/// surfaces).
fn error_code(err: &ServerError) -> i32 {
    match err {
        ServerError::InvalidSession => 1,
        ServerError::EmptyStatement => 2,
        ServerError::InvalidArguments(_) => 3,
        ServerError::Syntax(_) => 4,
        ServerError::Semantic(_) => 5,
        ServerError::Execution(_) => 6,
        ServerError::IncompatibleDatatype { .. } => 10,
        ServerError::DataOverflow { .. } => 11,
        ServerError::MultipleStatement => 12,
        ServerError::IncorrectHostvarCount { .. } => 13,
        ServerError::PreparedNameNotFound(_) => 14,
        ServerError::DisallowedAsPrepared(_) => 15,
        ServerError::NetServerDataReceive => 20,
        ServerError::NetDifferentBitPlatform { .. } => 21,
        ServerError::NetDifferentRelease { .. } => 22,
        ServerError::NetServerHandshake(_) => 23,
        ServerError::WireUnknownTag(_) => 24,
        ServerError::LkUnilaterallyAborted => 30,
        ServerError::DbNoModifications => 31,
        ServerError::Interrupted => 32,
        ServerError::InvalidXaslNode => 33,
        ServerError::TimeConversion(_) => 34,
        ServerError::ZeroDivide => 35,
        ServerError::OutOfVirtualMemory => 36,
        ServerError::Generic(_) => 99,
    }
}

fn pack_error(buf: &mut BytesMut, err: &ServerError) {
    buf.extend_from_slice(&error_code(err).to_be_bytes());
    pack_string(buf, Some(&err.to_string()));
}

/// The only path from a handler to the wire on failure (spec.md §4.3):
/// reads the error, triggers unilateral abort / the `reset_on_commit`
/// latch per `ServerError`'s own classification, packs the error area,
/// and sends it. A failed send after a successful compute is logged, not
/// re-raised — the client is already gone (spec.md §7).
pub async fn return_error_to_client(conn: &mut Connection, rid: u32, err: &ServerError) -> Result<()> {
    if err.triggers_unilateral_abort() {
        warn!(rid, error = %err, "unilaterally aborting transaction");
    }
    if err.sets_reset_on_commit() {
        conn.reset_on_commit = true;
    }
    let mut buf = BytesMut::new();
    pack_error(&mut buf, err);
    if let Err(send_err) = conn.send_reply(rid, &buf).await {
        error!(rid, error = %send_err, "failed to send error reply to client");
    }
    Ok(())
}

fn pack_row(buf: &mut BytesMut, row: &[Literal]) {
    buf.extend_from_slice(&(row.len() as i32).to_be_bytes());
    for field in row {
        literal_to_wire(field).pack(buf);
    }
}

fn unpack_host_vars(buf: &mut Bytes) -> Result<Vec<Literal>> {
    require(buf, 4)?;
    let count = buf.get_i32();
    if count < 0 {
        return Err(ServerError::NetServerDataReceive);
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(wire_to_literal(Value::unpack(buf)?));
    }
    Ok(out)
}

fn require(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        Err(ServerError::NetServerDataReceive)
    } else {
        Ok(())
    }
}

fn unpack_i32(buf: &mut Bytes) -> Result<i32> {
    require(buf, 4)?;
    Ok(buf.get_i32())
}

fn unpack_i64(buf: &mut Bytes) -> Result<i64> {
    require(buf, 8)?;
    Ok(buf.get_i64())
}

fn unpack_u8(buf: &mut Bytes) -> Result<u8> {
    require(buf, 1)?;
    Ok(buf.get_u8())
}

fn unpack_exec_flags(b: u8) -> ExecFlags {
    if b == 1 {
        ExecFlags::Async
    } else {
        ExecFlags::Sync
    }
}

fn unpack_client_cache_time(v: i64) -> Option<u64> {
    if v < 0 {
        None
    } else {
        Some(v as u64)
    }
}

fn statement_type_byte(t: StatementType) -> u8 {
    match t {
        StatementType::Select => 0,
        StatementType::Insert => 1,
        StatementType::Update => 2,
        StatementType::Delete => 3,
        StatementType::Other => 4,
    }
}

fn pack_column_types(buf: &mut BytesMut, types: &[Tag]) {
    buf.extend_from_slice(&(types.len() as i32).to_be_bytes());
    for t in types {
        buf.extend_from_slice(&(*t as u8).to_be_bytes());
    }
}

fn pack_execute_outcome(buf: &mut BytesMut, outcome: &ExecuteOutcome) {
    buf.extend_from_slice(&(outcome.query_id as i64).to_be_bytes());
    buf.extend_from_slice(&outcome.list_id.to_be_bytes());
    buf.extend_from_slice(&(outcome.server_cache_time as i64).to_be_bytes());
    match &outcome.first_page {
        None => buf.extend_from_slice(&0u8.to_be_bytes()),
        Some(row) => {
            buf.extend_from_slice(&1u8.to_be_bytes());
            pack_row(buf, row);
        }
    }
}

/// A server-side large-object blob, addressed by a process-unique id the
/// client treats as an opaque LOID (spec.md §4.3 "large-object handlers").
/// Disk-resident LOB storage is the non-goal storage-engine collaborator;
/// this is an in-memory stand-in sufficient to drive the offset/length
/// read-write protocol described in spec.md §4.3.
struct LobStore {
    next_id: AtomicI64,
    blobs: Mutex<HashMap<i64, Vec<u8>>>,
}

impl LobStore {
    fn new() -> LobStore {
        LobStore { next_id: AtomicI64::new(1), blobs: Mutex::new(HashMap::new()) }
    }

    fn write(&self, loid: i64, offset: i64, data: &[u8]) -> Result<i32> {
        let mut blobs = self.blobs.lock().unwrap();
        let blob = blobs.entry(loid).or_default();
        let start = offset as usize;
        if blob.len() < start + data.len() {
            blob.resize(start + data.len(), 0);
        }
        blob[start..start + data.len()].copy_from_slice(data);
        Ok(data.len() as i32)
    }

    fn read(&self, loid: i64, offset: i64, length: i32) -> Result<Vec<u8>> {
        let blobs = self.blobs.lock().unwrap();
        let blob = blobs.get(&loid).ok_or(ServerError::InvalidArguments("unknown LOID".into()))?;
        let start = (offset as usize).min(blob.len());
        let end = (start + length.max(0) as usize).min(blob.len());
        Ok(blob[start..end].to_vec())
    }
}

const BACKUP_CHUNK_SIZE: usize = 256;

/// Per-transaction query registry plus the session table, both shared
/// across every connection in the process (spec.md §5). A real
/// multi-transaction server would key `QueryManager`/session storage by
/// transaction id; this crate runs one shared instance, which is
/// sufficient to drive spec.md §8's end-to-end scenarios without
/// modeling the transaction manager (a non-goal collaborator, spec.md §1).
pub struct Dispatcher {
    cfg: Arc<ServerConfig>,
    plan_cache: Arc<PlanCache>,
    query_manager: Arc<QueryManager>,
    lob_store: LobStore,
    next_session_id: AtomicU32,
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl Dispatcher {
    pub fn new(cfg: Arc<ServerConfig>) -> Dispatcher {
        let plan_cache = Arc::new(PlanCache::new(cfg.plan_cache_max_entries, cfg.xasl_plan_max_bytes));
        let query_manager = Arc::new(QueryManager::new(Arc::new(InMemoryExecutor), 64));
        Dispatcher {
            cfg,
            plan_cache,
            query_manager,
            lob_store: LobStore::new(),
            next_session_id: AtomicU32::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Runs one request to completion: decode, dispatch, reply. Errors
    /// from the handler are turned into a wire error reply rather than
    /// propagated — only a transport-level failure (dropped connection)
    /// bubbles up to the caller, per spec.md §4.3.
    pub async fn dispatch(&self, conn: &mut Connection, pdu: RequestPdu) -> Result<()> {
        let rid = pdu.rid;
        let code = match RequestCode::from_u32(pdu.request_code) {
            Ok(c) => c,
            Err(e) => return return_error_to_client(conn, rid, &e).await,
        };
        debug!(rid, request_code = ?code, "dispatching request");
        if let Err(e) = self.handle(conn, rid, code, pdu.payload).await {
            return_error_to_client(conn, rid, &e).await?;
        }
        Ok(())
    }

    async fn handle(&self, conn: &mut Connection, rid: u32, code: RequestCode, mut payload: Bytes) -> Result<()> {
        match code {
            RequestCode::Handshake => self.handle_handshake(conn, rid, &mut payload).await,
            RequestCode::SessionOpen => self.handle_session_open(conn, rid, &mut payload).await,
            RequestCode::SessionClose => self.handle_session_close(conn, rid, &mut payload).await,
            RequestCode::Compile => self.handle_compile(conn, rid, &mut payload).await,
            RequestCode::Execute => self.handle_execute(conn, rid, &mut payload).await,
            RequestCode::DropStatement => self.handle_drop_statement(conn, rid, &mut payload).await,
            RequestCode::DropAllStatements => self.handle_drop_all(conn, rid, &mut payload).await,
            RequestCode::Prepare => self.handle_prepare(conn, rid, &mut payload).await,
            RequestCode::ExecutePrepared => self.handle_execute_prepared(conn, rid, &mut payload).await,
            RequestCode::Deallocate => self.handle_deallocate(conn, rid, &mut payload).await,
            RequestCode::GetListFilePage => self.handle_get_list_file_page(conn, rid, &mut payload).await,
            RequestCode::EndQuery => self.handle_end_query(conn, rid, &mut payload).await,
            RequestCode::SyncQuery => self.handle_sync_query(conn, rid, &mut payload).await,
            RequestCode::Interrupt => self.handle_interrupt(conn, rid, &mut payload).await,
            RequestCode::Commit => self.handle_commit_or_abort(conn, rid, &mut payload).await,
            RequestCode::Abort => self.handle_commit_or_abort(conn, rid, &mut payload).await,
            RequestCode::LobRead => self.handle_lob_read(conn, rid, &mut payload).await,
            RequestCode::LobWrite => self.handle_lob_write(conn, rid, &mut payload).await,
            RequestCode::BackupDump => self.handle_backup_dump(conn, rid).await,
        }
    }

    fn with_session<T>(&self, id: SessionId, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&id).ok_or(ServerError::InvalidSession)?;
        f(session)
    }

    async fn handle_handshake(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let req = unpack_handshake_request(payload)?;
        let reply = conn.handshake(req).await?;
        let mut buf = BytesMut::new();
        pack_handshake_reply(&mut buf, &reply);
        conn.send_reply(rid, &buf).await
    }

    async fn handle_session_open(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let user_oid = unpack_i32(payload)?;
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let session = Session::new(self.cfg.clone(), self.plan_cache.clone(), self.query_manager.clone(), user_oid);
        self.sessions.lock().unwrap().insert(id, session);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(id as i32).to_be_bytes());
        conn.send_reply(rid, &buf).await
    }

    async fn handle_session_close(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let id = unpack_i32(payload)? as SessionId;
        if let Some(mut session) = self.sessions.lock().unwrap().remove(&id) {
            session.close();
        }
        conn.send_reply(rid, &[]).await
    }

    async fn handle_compile(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let id = unpack_i32(payload)? as SessionId;
        let sql_text = unpack_string(payload)?.ok_or(ServerError::EmptyStatement)?;
        let (position, kind, column_types) = self.with_session(id, |s| {
            let position = s.compile(&sql_text)?;
            Ok((position, s.statement_type(position)?, s.column_types(position)?))
        })?;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(position as i32).to_be_bytes());
        buf.extend_from_slice(&statement_type_byte(kind).to_be_bytes());
        pack_column_types(&mut buf, &column_types);
        conn.send_reply(rid, &buf).await
    }

    async fn handle_execute(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let id = unpack_i32(payload)? as SessionId;
        let position = unpack_i32(payload)? as usize;
        let host_vars = unpack_host_vars(payload)?;
        let flags = unpack_exec_flags(unpack_u8(payload)?);
        let client_cache_time = unpack_client_cache_time(unpack_i64(payload)?);
        let outcome = self.with_session(id, |s| s.execute(position, host_vars, flags, client_cache_time))?;
        let mut buf = BytesMut::new();
        pack_execute_outcome(&mut buf, &outcome);
        conn.send_reply(rid, &buf).await
    }

    async fn handle_drop_statement(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let id = unpack_i32(payload)? as SessionId;
        let position = unpack_i32(payload)? as usize;
        self.with_session(id, |s| s.drop_statement(position))?;
        conn.send_reply(rid, &[]).await
    }

    async fn handle_drop_all(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let id = unpack_i32(payload)? as SessionId;
        self.with_session(id, |s| s.drop_all())?;
        conn.send_reply(rid, &[]).await
    }

    async fn handle_prepare(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let id = unpack_i32(payload)? as SessionId;
        let name = unpack_string(payload)?.ok_or(ServerError::InvalidArguments("missing name".into()))?;
        let sql_text = unpack_string(payload)?.ok_or(ServerError::EmptyStatement)?;
        self.with_session(id, |s| s.prepare_statement(&name, &sql_text))?;
        conn.send_reply(rid, &[]).await
    }

    async fn handle_execute_prepared(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let id = unpack_i32(payload)? as SessionId;
        let name = unpack_string(payload)?.ok_or(ServerError::InvalidArguments("missing name".into()))?;
        let host_vars = unpack_host_vars(payload)?;
        let flags = unpack_exec_flags(unpack_u8(payload)?);
        let client_cache_time = unpack_client_cache_time(unpack_i64(payload)?);
        let outcome =
            self.with_session(id, |s| s.execute_prepared(&name, host_vars, flags, client_cache_time))?;
        let mut buf = BytesMut::new();
        pack_execute_outcome(&mut buf, &outcome);
        conn.send_reply(rid, &buf).await
    }

    async fn handle_deallocate(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let id = unpack_i32(payload)? as SessionId;
        let name = unpack_string(payload)?.ok_or(ServerError::InvalidArguments("missing name".into()))?;
        self.with_session(id, |s| s.deallocate(&name))?;
        conn.send_reply(rid, &[]).await
    }

    async fn handle_get_list_file_page(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let query_id = unpack_i64(payload)? as QueryId;
        let volid = unpack_i32(payload)? as i16;
        let pageid = unpack_i32(payload)?;
        let row = self.query_manager.get_list_file_page(query_id, volid, pageid)?;
        let mut buf = BytesMut::new();
        pack_row(&mut buf, &row);
        conn.send_reply(rid, &buf).await
    }

    async fn handle_end_query(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let query_id = unpack_i64(payload)? as QueryId;
        self.query_manager.end_query(query_id);
        conn.send_reply(rid, &[]).await
    }

    async fn handle_sync_query(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let query_id = unpack_i64(payload)? as QueryId;
        let wait_flag = unpack_u8(payload)? != 0;
        let list_id = self.query_manager.sync_query(query_id, wait_flag)?;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&list_id.to_be_bytes());
        conn.send_reply(rid, &buf).await
    }

    async fn handle_interrupt(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let query_id = unpack_i64(payload)? as QueryId;
        self.query_manager.interrupt(query_id)?;
        conn.send_reply(rid, &[]).await
    }

    /// `Commit`/`Abort` share the exact same `reset_on_commit` decision
    /// (spec.md §4.3: `stran_server_abort` mirrors `stran_server_commit`
    /// byte-for-byte on this point). The `(Standby, Normal)` row clears
    /// the connection's latch as a side effect of reading it.
    async fn handle_commit_or_abort(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let has_updated = unpack_u8(payload)? != 0;
        let ha_state = match unpack_u8(payload)? {
            0 => HaState::Active,
            1 => HaState::ToBeStandby,
            _ => HaState::Standby,
        };
        let client_kind = match unpack_u8(payload)? {
            0 => ClientKind::Normal,
            1 => ClientKind::Broker,
            _ => ClientKind::SlaveOnlyBroker,
        };
        let latch_was_set = conn.reset_on_commit;
        let reset = decide_reset_on_commit(has_updated, ha_state, client_kind, latch_was_set);
        if ha_state == HaState::Standby && client_kind == ClientKind::Normal && latch_was_set {
            conn.reset_on_commit = false;
        }
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(reset as u8).to_be_bytes());
        conn.send_reply(rid, &buf).await
    }

    async fn handle_lob_write(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let loid = unpack_i64(payload)?;
        let offset = unpack_i64(payload)?;
        let length = unpack_i32(payload)?;
        let data = conn.recv_data(rid).await?;
        if data.len() < length as usize {
            return Err(ServerError::NetServerDataReceive);
        }
        let written = self.lob_store.write(loid, offset, &data[..length as usize])?;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&written.to_be_bytes());
        conn.send_reply(rid, &buf).await
    }

    async fn handle_lob_read(&self, conn: &mut Connection, rid: u32, payload: &mut Bytes) -> Result<()> {
        let loid = unpack_i64(payload)?;
        let offset = unpack_i64(payload)?;
        let length = unpack_i32(payload)?;
        let data = self.lob_store.read(loid, offset, length)?;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(data.len() as i32).to_be_bytes());
        conn.send_reply_and_data(rid, &buf, &[&data]).await
    }

    /// Writes a server-side formatted text dump (here, a snapshot of the
    /// process-wide plan cache size) to an in-memory sink and streams it
    /// back in fixed-size chunks, chunk count sent first (spec.md §4.3).
    async fn handle_backup_dump(&self, conn: &mut Connection, rid: u32) -> Result<()> {
        let sink = format!("plan_cache_entries={}\n", self.plan_cache.len());
        let bytes = sink.into_bytes();
        let chunk_count = bytes.len().div_ceil(BACKUP_CHUNK_SIZE).max(1);
        let mut header = BytesMut::new();
        header.extend_from_slice(&(chunk_count as i32).to_be_bytes());
        conn.send_reply(rid, &header).await?;
        for chunk in bytes.chunks(BACKUP_CHUNK_SIZE.max(1)).collect::<Vec<_>>().into_iter() {
            conn.server_push(rid, PushTag::GetNextLogPages, chunk).await?;
        }
        if bytes.is_empty() {
            conn.server_push(rid, PushTag::EndCallback, &[]).await?;
        }
        Ok(())
    }

    /// Seeds a session's queryable tables directly, standing in for the
    /// catalog/storage lookup a real build would run a `SELECT` against
    /// (the non-goal storage-engine collaborator, spec.md §1). Exists for
    /// demos and integration tests — there is no request code for it, since
    /// schema definition is out of scope.
    pub fn register_table(&self, session_id: SessionId, name: &str, def: TableDef) -> Result<()> {
        self.with_session(session_id, |s| {
            s.register_table(name, def);
            Ok(())
        })
    }

    pub fn plan_cache(&self) -> &Arc<PlanCache> {
        &self.plan_cache
    }

    pub fn query_manager(&self) -> &Arc<QueryManager> {
        &self.query_manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_reset_table_matches_spec() {
        assert!(decide_reset_on_commit(true, HaState::ToBeStandby, ClientKind::Normal, false));
        assert!(!decide_reset_on_commit(false, HaState::ToBeStandby, ClientKind::Normal, false));
        assert!(decide_reset_on_commit(false, HaState::Standby, ClientKind::Normal, true));
        assert!(!decide_reset_on_commit(false, HaState::Standby, ClientKind::Normal, false));
        assert!(decide_reset_on_commit(false, HaState::Active, ClientKind::SlaveOnlyBroker, false));
        assert!(decide_reset_on_commit(false, HaState::Standby, ClientKind::Broker, false));
        assert!(!decide_reset_on_commit(false, HaState::Active, ClientKind::Normal, false));
    }

    #[test]
    fn error_code_is_stable_per_variant() {
        assert_eq!(error_code(&ServerError::InvalidSession), 1);
        assert_eq!(error_code(&ServerError::PreparedNameNotFound("x".into())), 14);
        assert_eq!(error_code(&ServerError::InvalidXaslNode), 33);
    }

    #[test]
    fn request_code_round_trips_known_values() {
        assert_eq!(RequestCode::from_u32(0).unwrap(), RequestCode::Handshake);
        assert_eq!(RequestCode::from_u32(18).unwrap(), RequestCode::BackupDump);
        assert!(RequestCode::from_u32(999).is_err());
    }

    #[test]
    fn lob_write_then_read_round_trips() {
        let store = LobStore::new();
        store.write(1, 0, b"hello").unwrap();
        store.write(1, 5, b" world").unwrap();
        let out = store.read(1, 0, 11).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn lob_read_past_end_clamps_to_available_bytes() {
        let store = LobStore::new();
        store.write(1, 0, b"hi").unwrap();
        let out = store.read(1, 0, 100).unwrap();
        assert_eq!(out, b"hi");
    }
}
