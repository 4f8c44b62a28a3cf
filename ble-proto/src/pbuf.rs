//! A minimal protobuf-shaped field codec.
//!
//! The real wire schema (§6.2 of the spec) is owned by a protobuf compiler
//! this daemon doesn't embed; this module hand-rolls just enough of the
//! tag/varint/length-delimited encoding to serialize the message catalogue
//! below, the way `monsgeek-transport`'s `command.rs` hand-rolls its own
//! HID report layout instead of depending on a description-language codec.

use thiserror::Error;

use crate::varint::{decode_varint, encode_varint, zigzag_decode, zigzag_encode, VarintError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated field: {0}")]
    Truncated(&'static str),
    #[error("unknown wire type tag {0}")]
    InvalidWireType(u64),
    #[error("field {0} invalid utf-8")]
    InvalidUtf8(&'static str),
    #[error("field {field} has out-of-range value {value}")]
    InvalidEnum { field: &'static str, value: u64 },
    #[error(transparent)]
    Varint(#[from] VarintError),
}

const WIRE_VARINT: u64 = 0;
const WIRE_LEN: u64 = 2;

pub fn write_varint_field(out: &mut Vec<u8>, field: u32, value: u64) {
    if value == 0 {
        return;
    }
    write_tag(out, field, WIRE_VARINT);
    out.extend(encode_varint(value));
}

pub fn write_bool_field(out: &mut Vec<u8>, field: u32, value: bool) {
    if value {
        write_varint_field(out, field, 1);
    }
}

pub fn write_u32_field(out: &mut Vec<u8>, field: u32, value: u32) {
    write_varint_field(out, field, value as u64);
}

pub fn write_u64_field(out: &mut Vec<u8>, field: u32, value: u64) {
    write_varint_field(out, field, value);
}

pub fn write_sint32_field(out: &mut Vec<u8>, field: u32, value: i32) {
    write_varint_field(out, field, zigzag_encode(value as i64));
}

pub fn write_string_field(out: &mut Vec<u8>, field: u32, value: &str) {
    if value.is_empty() {
        return;
    }
    write_bytes_field(out, field, value.as_bytes());
}

pub fn write_bytes_field(out: &mut Vec<u8>, field: u32, value: &[u8]) {
    if value.is_empty() {
        return;
    }
    write_tag(out, field, WIRE_LEN);
    out.extend(encode_varint(value.len() as u64));
    out.extend_from_slice(value);
}

/// Write an already-encoded submessage as a length-delimited field.
pub fn write_message_field(out: &mut Vec<u8>, field: u32, encoded: &[u8]) {
    write_bytes_field(out, field, encoded);
}

fn write_tag(out: &mut Vec<u8>, field: u32, wire_type: u64) {
    out.extend(encode_varint(((field as u64) << 3) | wire_type));
}

/// One decoded field: a varint value, or a length-delimited byte slice.
pub enum Field<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
}

/// Iterates over `(field_number, Field)` pairs in a message buffer.
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl<'a> Iterator for FieldReader<'a> {
    type Item = Result<(u32, Field<'a>), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let (tag, consumed) = match decode_varint(&self.buf[self.pos..]) {
            Ok(v) => v,
            Err(e) => return Some(Err(e.into())),
        };
        self.pos += consumed;
        let field = (tag >> 3) as u32;
        let wire_type = tag & 0x7;

        match wire_type {
            WIRE_VARINT => match decode_varint(&self.buf[self.pos..]) {
                Ok((value, consumed)) => {
                    self.pos += consumed;
                    Some(Ok((field, Field::Varint(value))))
                }
                Err(e) => Some(Err(e.into())),
            },
            WIRE_LEN => {
                let (len, consumed) = match decode_varint(&self.buf[self.pos..]) {
                    Ok(v) => v,
                    Err(e) => return Some(Err(e.into())),
                };
                self.pos += consumed;
                let len = len as usize;
                if self.buf.len() - self.pos < len {
                    return Some(Err(DecodeError::Truncated("length-delimited field")));
                }
                let bytes = &self.buf[self.pos..self.pos + len];
                self.pos += len;
                Some(Ok((field, Field::Bytes(bytes))))
            }
            other => Some(Err(DecodeError::InvalidWireType(other))),
        }
    }
}

pub fn as_string(bytes: &[u8], field: &'static str) -> Result<String, DecodeError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(field))
}

pub fn sint32_from_varint(value: u64) -> i32 {
    zigzag_decode(value) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_fields_round_trip() {
        let mut buf = Vec::new();
        write_u32_field(&mut buf, 1, 42);
        write_bool_field(&mut buf, 2, true);
        write_string_field(&mut buf, 3, "hello");
        write_sint32_field(&mut buf, 4, -7);

        let mut seen = Vec::new();
        for field in FieldReader::new(&buf) {
            let (num, value) = field.unwrap();
            match value {
                Field::Varint(v) => seen.push((num, v)),
                Field::Bytes(b) => seen.push((num, b.len() as u64)),
            }
        }
        assert_eq!(seen[0], (1, 42));
        assert_eq!(seen[1], (2, 1));
        assert_eq!(seen[2], (3, 5));
        assert_eq!(seen[3].0, 4);
        assert_eq!(sint32_from_varint(seen[3].1), -7);
    }

    #[test]
    fn zero_valued_fields_are_omitted() {
        let mut buf = Vec::new();
        write_u32_field(&mut buf, 1, 0);
        write_bool_field(&mut buf, 2, false);
        write_string_field(&mut buf, 3, "");
        assert!(buf.is_empty());
    }
}
