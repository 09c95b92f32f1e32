//! Wire codec (C1): serialize/deserialize the primitive domains to/from
//! length-prefixed, word-aligned byte buffers. See SPEC_FULL §4.1.
//!
//! Every primitive has a packed size computable ahead of time, a `pack`
//! that appends to a `BytesMut`, and an `unpack` that advances a cursor and
//! either copies or aliases (`nocopy`) the source buffer.

pub mod value;

pub use value::{Domain, Tag, Value};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, ServerError};

/// Round a byte length up to the next multiple of 4 (the machine-word
/// alignment this codec uses).
pub fn aligned(len: usize) -> usize {
    (len + 3) & !3
}

pub trait Pack {
    /// Number of bytes `pack` will write, including alignment padding.
    fn packed_size(&self) -> usize;
    fn pack(&self, buf: &mut BytesMut);
}

pub trait Unpack: Sized {
    /// Copies the value out of the buffer; always valid past the buffer's
    /// lifetime.
    fn unpack(buf: &mut Bytes) -> Result<Self>;
}

impl Pack for i32 {
    fn packed_size(&self) -> usize {
        4
    }
    fn pack(&self, buf: &mut BytesMut) {
        buf.put_i32(*self);
    }
}

impl Unpack for i32 {
    fn unpack(buf: &mut Bytes) -> Result<Self> {
        require(buf, 4)?;
        Ok(buf.get_i32())
    }
}

impl Pack for i64 {
    fn packed_size(&self) -> usize {
        8
    }
    fn pack(&self, buf: &mut BytesMut) {
        buf.put_i64(*self);
    }
}

impl Unpack for i64 {
    fn unpack(buf: &mut Bytes) -> Result<Self> {
        require(buf, 8)?;
        Ok(buf.get_i64())
    }
}

impl Pack for f32 {
    fn packed_size(&self) -> usize {
        4
    }
    fn pack(&self, buf: &mut BytesMut) {
        buf.put_f32(*self);
    }
}

impl Unpack for f32 {
    fn unpack(buf: &mut Bytes) -> Result<Self> {
        require(buf, 4)?;
        Ok(buf.get_f32())
    }
}

impl Pack for f64 {
    fn packed_size(&self) -> usize {
        8
    }
    fn pack(&self, buf: &mut BytesMut) {
        buf.put_f64(*self);
    }
}

impl Unpack for f64 {
    fn unpack(buf: &mut Bytes) -> Result<Self> {
        require(buf, 8)?;
        Ok(buf.get_f64())
    }
}

fn require(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        Err(ServerError::NetServerDataReceive)
    } else {
        Ok(())
    }
}

/// A length-prefixed string: `i32 len` (or `-1` for NULL) followed by
/// `len` bytes of UTF-8 plus a NUL terminator, padded to word alignment
/// (`or_packed_string_length`'s formula). Packed size is
/// `4 + aligned(len + 1)`.
pub fn pack_string(buf: &mut BytesMut, s: Option<&str>) {
    match s {
        None => buf.put_i32(-1),
        Some(s) => {
            let bytes = s.as_bytes();
            buf.put_i32(bytes.len() as i32);
            buf.put_slice(bytes);
            let pad = aligned(bytes.len() + 1) - bytes.len();
            buf.put_bytes(0, pad);
        }
    }
}

pub fn string_packed_size(s: Option<&str>) -> usize {
    match s {
        None => 4,
        Some(s) => 4 + aligned(s.len() + 1),
    }
}

/// Copying unpack of a length-prefixed string.
pub fn unpack_string(buf: &mut Bytes) -> Result<Option<String>> {
    require(buf, 4)?;
    let len = buf.get_i32();
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    let padded = aligned(len + 1);
    require(buf, padded)?;
    let raw = buf.copy_to_bytes(padded);
    let s = String::from_utf8(raw[..len].to_vec())
        .map_err(|e| ServerError::NetServerDataReceive.with_context(e))?;
    Ok(Some(s))
}

/// Non-copying unpack: returns a borrowed view into the same reference-
/// counted `Bytes` buffer (a cheap slice, not a heap copy) rather than a
/// freshly allocated `String`. Valid for as long as the caller retains the
/// original buffer's `Bytes` handle — see DESIGN.md Open Question #1.
pub fn unpack_string_nocopy(buf: &mut Bytes) -> Result<Option<Bytes>> {
    require(buf, 4)?;
    let len = buf.get_i32();
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    let padded = aligned(len + 1);
    require(buf, padded)?;
    let raw = buf.copy_to_bytes(padded);
    Ok(Some(raw.slice(0..len)))
}

// ServerError has no `with_context` of its own; this extension trait adds
// one locally so `unpack_string` can attach the UTF-8 error without a new
// `ServerError` variant.
trait WithContext {
    fn with_context<E: std::fmt::Display>(self, e: E) -> Self;
}

impl WithContext for ServerError {
    fn with_context<E: std::fmt::Display>(self, e: E) -> Self {
        match self {
            ServerError::NetServerDataReceive => ServerError::Generic(format!(
                "error receiving data from client: {e}"
            )),
            other => other,
        }
    }
}
