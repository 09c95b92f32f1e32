//! Self-describing `value` wire type: a tag byte followed by the tag's own
//! encoding (SPEC_FULL §4.1/§6). Also the type-tag set used by the
//! type checker (SPEC_FULL §3 "Types") — `Domain` carries the
//! parameterized attributes (precision, scale) a `Tag` alone cannot.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, ServerError};
use super::{aligned, pack_string, string_packed_size, unpack_string};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    Null = 0,
    Integer = 1,
    Bigint = 2,
    Smallint = 3,
    Float = 4,
    Double = 5,
    Numeric = 6,
    Monetary = 7,
    Date = 8,
    Time = 9,
    Timestamp = 10,
    Datetime = 11,
    Char = 12,
    Varchar = 13,
    Bit = 14,
    Varbit = 15,
    Oid = 16,
}

impl Tag {
    pub fn from_byte(b: u8) -> Result<Tag> {
        Ok(match b {
            0 => Tag::Null,
            1 => Tag::Integer,
            2 => Tag::Bigint,
            3 => Tag::Smallint,
            4 => Tag::Float,
            5 => Tag::Double,
            6 => Tag::Numeric,
            7 => Tag::Monetary,
            8 => Tag::Date,
            9 => Tag::Time,
            10 => Tag::Timestamp,
            11 => Tag::Datetime,
            12 => Tag::Char,
            13 => Tag::Varchar,
            14 => Tag::Bit,
            15 => Tag::Varbit,
            16 => Tag::Oid,
            other => return Err(ServerError::WireUnknownTag(other)),
        })
    }
}

/// Parameterized attribute carried alongside a tag: precision/scale for
/// NUMERIC, declared length for CHAR/VARCHAR/BIT/VARBIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Plain,
    Numeric { precision: u8, scale: u8 },
    Sized { max_len: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i32),
    Bigint(i64),
    Smallint(i16),
    Float(f32),
    Double(f64),
    Numeric { unscaled: i64, precision: u8, scale: u8 },
    Monetary(f64),
    Date(i32),
    Time(i32),
    Timestamp(i64),
    Datetime(i64),
    Char(String),
    Varchar(String),
    Bit(Vec<u8>),
    Varbit(Vec<u8>),
    Oid { volid: i16, pageid: i32, slotid: i16 },
}

impl Value {
    pub fn tag(&self) -> Tag {
        match self {
            Value::Null => Tag::Null,
            Value::Integer(_) => Tag::Integer,
            Value::Bigint(_) => Tag::Bigint,
            Value::Smallint(_) => Tag::Smallint,
            Value::Float(_) => Tag::Float,
            Value::Double(_) => Tag::Double,
            Value::Numeric { .. } => Tag::Numeric,
            Value::Monetary(_) => Tag::Monetary,
            Value::Date(_) => Tag::Date,
            Value::Time(_) => Tag::Time,
            Value::Timestamp(_) => Tag::Timestamp,
            Value::Datetime(_) => Tag::Datetime,
            Value::Char(_) => Tag::Char,
            Value::Varchar(_) => Tag::Varchar,
            Value::Bit(_) => Tag::Bit,
            Value::Varbit(_) => Tag::Varbit,
            Value::Oid { .. } => Tag::Oid,
        }
    }

    pub fn packed_size(&self) -> usize {
        1 + match self {
            Value::Null => 0,
            Value::Integer(_) => 4,
            Value::Bigint(_) => 8,
            Value::Smallint(_) => 4, // padded to word
            Value::Float(_) => 4,
            Value::Double(_) => 8,
            Value::Numeric { .. } => 8 + 2,
            Value::Monetary(_) => 8,
            Value::Date(_) => 4,
            Value::Time(_) => 4,
            Value::Timestamp(_) => 8,
            Value::Datetime(_) => 8,
            Value::Char(s) | Value::Varchar(s) => string_packed_size(Some(s)),
            Value::Bit(b) | Value::Varbit(b) => 4 + aligned(b.len()),
            Value::Oid { .. } => 8,
        }
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tag() as u8);
        match self {
            Value::Null => {}
            Value::Integer(v) => buf.put_i32(*v),
            Value::Bigint(v) => buf.put_i64(*v),
            Value::Smallint(v) => {
                buf.put_i16(*v);
                buf.put_i16(0);
            }
            Value::Float(v) => buf.put_f32(*v),
            Value::Double(v) => buf.put_f64(*v),
            Value::Numeric { unscaled, precision, scale } => {
                buf.put_i64(*unscaled);
                buf.put_u8(*precision);
                buf.put_u8(*scale);
            }
            Value::Monetary(v) => buf.put_f64(*v),
            Value::Date(v) => buf.put_i32(*v),
            Value::Time(v) => buf.put_i32(*v),
            Value::Timestamp(v) => buf.put_i64(*v),
            Value::Datetime(v) => buf.put_i64(*v),
            Value::Char(s) | Value::Varchar(s) => pack_string(buf, Some(s)),
            Value::Bit(b) | Value::Varbit(b) => {
                buf.put_i32(b.len() as i32);
                buf.put_slice(b);
                buf.put_bytes(0, aligned(b.len()) - b.len());
            }
            Value::Oid { volid, pageid, slotid } => {
                buf.put_i16(*volid);
                buf.put_i32(*pageid);
                buf.put_i16(*slotid);
            }
        }
    }

    pub fn unpack(buf: &mut Bytes) -> Result<Value> {
        if buf.remaining() < 1 {
            return Err(ServerError::NetServerDataReceive);
        }
        let tag = Tag::from_byte(buf.get_u8())?;
        Ok(match tag {
            Tag::Null => Value::Null,
            Tag::Integer => Value::Integer(need(buf, 4)?.get_i32()),
            Tag::Bigint => Value::Bigint(need(buf, 8)?.get_i64()),
            Tag::Smallint => {
                let mut b = need(buf, 4)?;
                let v = b.get_i16();
                b.advance(2);
                Value::Smallint(v)
            }
            Tag::Float => Value::Float(need(buf, 4)?.get_f32()),
            Tag::Double => Value::Double(need(buf, 8)?.get_f64()),
            Tag::Numeric => {
                let mut b = need(buf, 10)?;
                let unscaled = b.get_i64();
                let precision = b.get_u8();
                let scale = b.get_u8();
                Value::Numeric { unscaled, precision, scale }
            }
            Tag::Monetary => Value::Monetary(need(buf, 8)?.get_f64()),
            Tag::Date => Value::Date(need(buf, 4)?.get_i32()),
            Tag::Time => Value::Time(need(buf, 4)?.get_i32()),
            Tag::Timestamp => Value::Timestamp(need(buf, 8)?.get_i64()),
            Tag::Datetime => Value::Datetime(need(buf, 8)?.get_i64()),
            Tag::Char => Value::Char(unpack_string(buf)?.unwrap_or_default()),
            Tag::Varchar => Value::Varchar(unpack_string(buf)?.unwrap_or_default()),
            Tag::Bit | Tag::Varbit => {
                if buf.remaining() < 4 {
                    return Err(ServerError::NetServerDataReceive);
                }
                let len = buf.get_i32();
                if len < 0 {
                    return Err(ServerError::WireUnknownTag(tag as u8));
                }
                let len = len as usize;
                let padded = aligned(len);
                if buf.remaining() < padded {
                    return Err(ServerError::NetServerDataReceive);
                }
                let raw = buf.copy_to_bytes(padded);
                let v = raw[..len].to_vec();
                if tag == Tag::Bit {
                    Value::Bit(v)
                } else {
                    Value::Varbit(v)
                }
            }
            Tag::Oid => {
                let mut b = need(buf, 8)?;
                let volid = b.get_i16();
                let pageid = b.get_i32();
                let slotid = b.get_i16();
                Value::Oid { volid, pageid, slotid }
            }
        })
    }
}

/// Splits off exactly `n` bytes (erroring if short) so callers can read
/// fixed-width fields without repeating the remaining-length check.
fn need(buf: &mut Bytes, n: usize) -> Result<Bytes> {
    if buf.remaining() < n {
        return Err(ServerError::NetServerDataReceive);
    }
    Ok(buf.split_to(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) {
        let mut buf = BytesMut::new();
        v.pack(&mut buf);
        assert_eq!(buf.len(), v.packed_size());
        let mut bytes = buf.freeze();
        let out = Value::unpack(&mut bytes).unwrap();
        assert_eq!(out, v);
    }

    #[test]
    fn every_primitive_round_trips() {
        round_trip(Value::Null);
        round_trip(Value::Integer(42));
        round_trip(Value::Bigint(-1));
        round_trip(Value::Smallint(7));
        round_trip(Value::Float(1.5));
        round_trip(Value::Double(2.5));
        round_trip(Value::Numeric { unscaled: 12345, precision: 10, scale: 2 });
        round_trip(Value::Monetary(9.99));
        round_trip(Value::Date(20260728));
        round_trip(Value::Time(120000));
        round_trip(Value::Timestamp(1_700_000_000));
        round_trip(Value::Datetime(1_700_000_000_000));
        round_trip(Value::Char("hi".into()));
        round_trip(Value::Varchar("hello world".into()));
        round_trip(Value::Bit(vec![0xff, 0x0f]));
        round_trip(Value::Varbit(vec![1, 2, 3]));
        round_trip(Value::Oid { volid: 1, pageid: 2, slotid: 3 });
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(255);
        let mut bytes = buf.freeze();
        assert_eq!(
            Value::unpack(&mut bytes).unwrap_err(),
            ServerError::WireUnknownTag(255)
        );
    }
}
