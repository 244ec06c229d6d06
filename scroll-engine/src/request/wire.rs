//! Primitives for the binary wire form of the request envelope.
//!
//! Unsigned values are LEB128 varints; signed values are zigzag-encoded
//! first so that small negatives (the `-1` size sentinel in particular)
//! stay small on the wire. Durations travel as millisecond varints.

use std::time::Duration;

use bytes::{Buf, BufMut};

use crate::errors::EngineError;

pub(crate) fn put_uvarint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub(crate) fn get_uvarint(buf: &mut impl Buf) -> Result<u64, EngineError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(EngineError::wire("truncated varint"));
        }
        if shift > 63 {
            return Err(EngineError::wire("varint too long"));
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

pub(crate) fn put_varint(buf: &mut impl BufMut, value: i64) {
    put_uvarint(buf, ((value << 1) ^ (value >> 63)) as u64);
}

pub(crate) fn get_varint(buf: &mut impl Buf) -> Result<i64, EngineError> {
    let raw = get_uvarint(buf)?;
    Ok((raw >> 1) as i64 ^ -((raw & 1) as i64))
}

pub(crate) fn put_bool(buf: &mut impl BufMut, value: bool) {
    buf.put_u8(u8::from(value));
}

pub(crate) fn get_bool(buf: &mut impl Buf) -> Result<bool, EngineError> {
    if !buf.has_remaining() {
        return Err(EngineError::wire("truncated bool"));
    }
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(EngineError::wire(format!("invalid bool byte [{}]", other))),
    }
}

pub(crate) fn put_bytes(buf: &mut impl BufMut, value: &[u8]) {
    put_uvarint(buf, value.len() as u64);
    buf.put_slice(value);
}

pub(crate) fn get_bytes(buf: &mut impl Buf) -> Result<Vec<u8>, EngineError> {
    let len = get_uvarint(buf)? as usize;
    if buf.remaining() < len {
        return Err(EngineError::wire("truncated bytes"));
    }
    let mut value = vec![0u8; len];
    buf.copy_to_slice(&mut value);
    Ok(value)
}

pub(crate) fn put_string(buf: &mut impl BufMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

pub(crate) fn get_string(buf: &mut impl Buf) -> Result<String, EngineError> {
    let raw = get_bytes(buf)?;
    String::from_utf8(raw).map_err(|_| EngineError::wire("invalid utf-8 string"))
}

pub(crate) fn put_duration(buf: &mut impl BufMut, value: Duration) {
    put_uvarint(buf, value.as_millis() as u64);
}

pub(crate) fn get_duration(buf: &mut impl Buf) -> Result<Duration, EngineError> {
    Ok(Duration::from_millis(get_uvarint(buf)?))
}
