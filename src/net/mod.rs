//! Connection service (C2): framed request PDUs, reply/data delivery, abort
//! signaling, and server-initiated callbacks. See SPEC_FULL §4.2/§6.

pub mod conn;

pub use conn::Connection;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Result, ServerError};

/// `u32 request_code, u32 rid, u32 payload_len, payload`.
#[derive(Debug, Clone)]
pub struct RequestPdu {
    pub request_code: u32,
    pub rid: u32,
    pub payload: Bytes,
}

pub async fn read_pdu(stream: &mut TcpStream) -> Result<RequestPdu> {
    let mut header = [0u8; 12];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|_| ServerError::NetServerDataReceive)?;
    let mut h = Bytes::copy_from_slice(&header);
    let request_code = h.get_u32();
    let rid = h.get_u32();
    let payload_len = h.get_u32() as usize;

    let mut payload = vec![0u8; payload_len];
    if payload_len > 0 {
        stream
            .read_exact(&mut payload)
            .await
            .map_err(|_| ServerError::NetServerDataReceive)?;
    }
    Ok(RequestPdu {
        request_code,
        rid,
        payload: Bytes::from(payload),
    })
}

/// Server push / reply tags a handler may attach before or instead of its
/// final reply (SPEC_FULL §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushTag {
    MethodCall,
    AsyncObtainUserInput,
    GetNextLogPages,
    EndCallback,
}

/// Writes one frame: `u32 rid, u32 len, bytes`. Used uniformly for
/// replies, trailing data blobs, and pushes — they share one wire shape,
/// distinguished by the dispatcher's call sequence rather than a tag here.
pub async fn write_frame(stream: &mut TcpStream, rid: u32, body: &[u8]) -> Result<()> {
    let mut header = BytesMut::with_capacity(8);
    header.put_u32(rid);
    header.put_u32(body.len() as u32);
    stream
        .write_all(&header)
        .await
        .map_err(|e| ServerError::Generic(format!("send failed: {e}")))?;
    if !body.is_empty() {
        stream
            .write_all(body)
            .await
            .map_err(|e| ServerError::Generic(format!("send failed: {e}")))?;
    }
    Ok(())
}
