//! `Connection`: owns one client's `TcpStream` and implements the C2
//! contracts (`send_reply`, `send_reply_and_data`, `recv_data`,
//! `send_abort`, `server_push`) plus the handshake exchange.

use bitflags_like::Capabilities;
use bytes::{Buf, Bytes};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{Result, ServerError};
use crate::wire::{pack_string, string_packed_size, unpack_string};
use bytes::BytesMut;

use super::{read_pdu, write_frame, PushTag, RequestPdu};

/// Capability bits of record (SPEC_FULL §6). A tiny hand-rolled bitset —
/// the pack carries no `bitflags` dependency, so this mirrors the original's
/// plain `u32` mask with named constants instead of pulling one in.
mod bitflags_like {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities(pub u32);

    impl Capabilities {
        pub const INTERRUPT_ENABLED: u32 = 1 << 0;
        pub const UPDATE_DISABLED: u32 = 1 << 1;
        pub const REMOTE_DISABLED: u32 = 1 << 2;
        pub const FORWARD_COMPATIBLE: u32 = 1 << 3;
        pub const BACKWARD_COMPATIBLE: u32 = 1 << 4;

        pub fn has(self, bit: u32) -> bool {
            self.0 & bit != 0
        }

        pub fn without(self, bit: u32) -> Capabilities {
            Capabilities(self.0 & !bit)
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub client_release: String,
    pub client_capabilities: u32,
    pub client_bit_platform: u32,
    pub client_host: String,
}

#[derive(Debug, Clone)]
pub struct HandshakeReply {
    pub server_release: String,
    pub server_capabilities: u32,
    pub server_bit_platform: u32,
    pub server_host: String,
}

pub const SERVER_RELEASE: &str = "10.3";
pub const SERVER_BIT_PLATFORM: u32 = 64;

/// Per-connection state the dispatcher mutates: only the handler thread
/// currently owning the connection ever writes these (SPEC_FULL §5).
pub struct Connection {
    pub stream: TcpStream,
    pub reset_on_commit: bool,
    pub server_host: String,
    pub server_capabilities: u32,
    peer_capabilities: u32,
}

impl Connection {
    pub fn new(stream: TcpStream, server_host: String) -> Connection {
        Connection {
            stream,
            reset_on_commit: false,
            server_host,
            server_capabilities: Capabilities::INTERRUPT_ENABLED,
            peer_capabilities: 0,
        }
    }

    pub async fn read_pdu(&mut self) -> Result<RequestPdu> {
        read_pdu(&mut self.stream).await
    }

    /// Single small fixed-size reply.
    pub async fn send_reply(&mut self, rid: u32, reply: &[u8]) -> Result<()> {
        write_frame(&mut self.stream, rid, reply).await
    }

    /// Reply plus up to three trailing data blobs (SPEC_FULL §4.2).
    pub async fn send_reply_and_data(
        &mut self,
        rid: u32,
        reply: &[u8],
        data: &[&[u8]],
    ) -> Result<()> {
        if data.len() > 3 {
            return Err(ServerError::InvalidArguments(
                "at most three trailing data blobs".into(),
            ));
        }
        write_frame(&mut self.stream, rid, reply).await?;
        for d in data {
            write_frame(&mut self.stream, rid, d).await?;
        }
        Ok(())
    }

    /// Receives a single blob associated with `rid` (a client reply to a
    /// `server_push`, e.g. the input blob after `ASYNC_OBTAIN_USER_INPUT`).
    pub async fn recv_data(&mut self, rid: u32) -> Result<Bytes> {
        let pdu = self.read_pdu().await?;
        if pdu.rid != rid {
            return Err(ServerError::NetServerDataReceive);
        }
        Ok(pdu.payload)
    }

    /// Tears down an in-progress request. The handler must not write
    /// further on this rid after calling this.
    pub async fn send_abort(&mut self, rid: u32) -> Result<()> {
        warn!(rid, "aborting in-progress request");
        write_frame(&mut self.stream, rid, &[]).await
    }

    /// Initiates a server-side callback (user prompt, log-page streaming,
    /// pause/resume) before the handler's final reply.
    pub async fn server_push(&mut self, rid: u32, tag: PushTag, payload: &[u8]) -> Result<()> {
        let mut body = Vec::with_capacity(1 + payload.len());
        body.push(push_tag_byte(tag));
        body.extend_from_slice(payload);
        write_frame(&mut self.stream, rid, &body).await
    }

    pub async fn handshake(&mut self, req: HandshakeRequest) -> Result<HandshakeReply> {
        self.peer_capabilities = req.client_capabilities;
        debug!(client_release = %req.client_release, "handshake");

        // UPDATE_DISABLED / REMOTE_DISABLED subtract from the client's bits
        // before the compatibility check (SPEC_FULL §4.3).
        let server_caps = Capabilities(self.server_capabilities);
        let mut client_caps = Capabilities(req.client_capabilities);
        if server_caps.has(Capabilities::UPDATE_DISABLED) {
            client_caps = client_caps.without(Capabilities::UPDATE_DISABLED);
        }
        if server_caps.has(Capabilities::REMOTE_DISABLED) {
            client_caps = client_caps.without(Capabilities::REMOTE_DISABLED);
        }

        if req.client_bit_platform != SERVER_BIT_PLATFORM {
            return Err(ServerError::NetDifferentBitPlatform {
                client: req.client_bit_platform,
                server: SERVER_BIT_PLATFORM,
            });
        }

        if req.client_release != SERVER_RELEASE {
            // `check_client_capabilities`: FORWARD_COMPATIBLE only covers a
            // client *older* than this server, BACKWARD_COMPATIBLE only one
            // *newer* — the bit alone isn't enough, the release ordering has
            // to actually match the direction the client claims.
            let accepted = match rel_compare(&req.client_release, SERVER_RELEASE) {
                std::cmp::Ordering::Less => client_caps.has(Capabilities::FORWARD_COMPATIBLE),
                std::cmp::Ordering::Greater => client_caps.has(Capabilities::BACKWARD_COMPATIBLE),
                std::cmp::Ordering::Equal => true,
            };
            if !accepted {
                return Err(ServerError::NetDifferentRelease {
                    client: req.client_release.clone(),
                    server: SERVER_RELEASE.into(),
                });
            }
        }

        Ok(HandshakeReply {
            server_release: SERVER_RELEASE.into(),
            server_capabilities: self.server_capabilities,
            server_bit_platform: SERVER_BIT_PLATFORM,
            server_host: self.server_host.clone(),
        })
    }
}

/// Compares two dotted release strings (`"10.3"`, `"9.2.1"`) component by
/// component, numerically, the way `rel_compare` orders CUBRID release
/// numbers. A missing trailing component compares as `0`.
fn rel_compare(a: &str, b: &str) -> std::cmp::Ordering {
    let mut a_parts = a.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let mut b_parts = b.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    loop {
        let a_next = a_parts.next();
        let b_next = b_parts.next();
        match (a_next, b_next) {
            (None, None) => return std::cmp::Ordering::Equal,
            (a_next, b_next) => {
                let ord = a_next.unwrap_or(0).cmp(&b_next.unwrap_or(0));
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn push_tag_byte(tag: PushTag) -> u8 {
    match tag {
        PushTag::MethodCall => 0,
        PushTag::AsyncObtainUserInput => 1,
        PushTag::GetNextLogPages => 2,
        PushTag::EndCallback => 3,
    }
}

pub fn pack_handshake_request(buf: &mut BytesMut, req: &HandshakeRequest) {
    pack_string(buf, Some(&req.client_release));
    buf.extend_from_slice(&req.client_capabilities.to_be_bytes());
    buf.extend_from_slice(&req.client_bit_platform.to_be_bytes());
    pack_string(buf, Some(&req.client_host));
}

pub fn handshake_request_packed_size(req: &HandshakeRequest) -> usize {
    string_packed_size(Some(&req.client_release)) + 4 + 4 + string_packed_size(Some(&req.client_host))
}

pub fn unpack_handshake_request(buf: &mut Bytes) -> Result<HandshakeRequest> {
    let client_release = unpack_string(buf)?.ok_or(ServerError::NetServerHandshake(
        "missing client_release".into(),
    ))?;
    if buf.remaining() < 8 {
        return Err(ServerError::NetServerDataReceive);
    }
    let client_capabilities = buf.get_u32();
    let client_bit_platform = buf.get_u32();
    let client_host = unpack_string(buf)?.ok_or(ServerError::NetServerHandshake(
        "missing client_host".into(),
    ))?;
    Ok(HandshakeRequest {
        client_release,
        client_capabilities,
        client_bit_platform,
        client_host,
    })
}

pub fn pack_handshake_reply(buf: &mut BytesMut, reply: &HandshakeReply) {
    pack_string(buf, Some(&reply.server_release));
    pack_string(buf, Some("")); // reserved empty string slot, per SPEC_FULL §6
    buf.extend_from_slice(&reply.server_capabilities.to_be_bytes());
    buf.extend_from_slice(&reply.server_bit_platform.to_be_bytes());
    pack_string(buf, Some(&reply.server_host));
}
