//! Self-describing TLV frame encoding and decoding.
//!
//! Layout:
//! ```text
//! ┌───────┬────────────┬──────────┬────────┐
//! │ Tag   │ Length     │ CRC      │ Body   │
//! │ 1 byte│ 2|4 bytes  │ 0|2 bytes│ N bytes│
//! │       │ uint BE    │ uint16 BE│        │
//! └───────┴────────────┴──────────┴────────┘
//! ```
//!
//! The tag byte carries the type code in its low 6 bits. Bit `0x80` selects
//! the extended 4-byte length field, bit `0x40` marks a 2-byte CRC over the
//! body. All multi-byte integers are Big Endian.

use crate::codec::crc;
use crate::error::{Result, RoomwireError};

/// Extended-length marker: 4-byte length field follows the tag.
pub const TAG_LONG: u8 = 0x80;

/// Integrity marker: 2-byte CRC precedes the body.
pub const TAG_CRC: u8 = 0x40;

/// Mask extracting the 6-bit type code.
pub const TAG_MASK: u8 = 0x3F;

/// Header size of a value frame: tag + 2-byte length + 2-byte CRC.
pub const VALUE_HEADER_SIZE: usize = 5;

/// Type codes carried in the low 6 bits of the tag.
pub mod tag {
    pub const INT64: u8 = 0x05;
    pub const UINT8: u8 = 0x07;
    pub const UINT64: u8 = 0x0A;
    pub const FLOAT64: u8 = 0x0C;
    pub const STRING: u8 = 0x13;
    pub const JSON: u8 = 0x14;
    pub const BYTES: u8 = 0x16;
    pub const NIL: u8 = 0x28;
}

/// Encoding options for TLV frames.
///
/// The extended length field is never an option: it is chosen from the body
/// size alone, so decoders need only look at the tag bits.
#[derive(Debug, Clone, Copy)]
pub struct TlvOptions {
    /// Append a CRC over the body and set the `0x40` tag bit.
    pub check_crc: bool,
}

impl Default for TlvOptions {
    fn default() -> Self {
        Self { check_crc: false }
    }
}

impl TlvOptions {
    /// Options with the integrity checksum enabled.
    pub fn with_crc() -> Self {
        Self { check_crc: true }
    }
}

/// Encode a body under the given type code.
///
/// A body longer than 65535 bytes switches to the 4-byte length field and
/// sets the `0x80` tag bit. A CRC is written when `options.check_crc` is set
/// or when the caller's tag already carries the `0x40` bit.
pub fn encode(tag: u8, body: &[u8], options: TlvOptions) -> Result<Vec<u8>> {
    let code = tag & TAG_MASK;
    if code == 0 || tag & !TAG_CRC > TAG_MASK {
        return Err(RoomwireError::UnsupportedTag(tag));
    }
    if body.len() > u32::MAX as usize {
        return Err(RoomwireError::ValueTooLarge(body.len()));
    }

    let long = body.len() > u16::MAX as usize;
    let with_crc = options.check_crc || tag & TAG_CRC != 0;

    let mut out = Vec::with_capacity(1 + if long { 4 } else { 2 } + if with_crc { 2 } else { 0 } + body.len());
    let mut first = code;
    if long {
        first |= TAG_LONG;
    }
    if with_crc {
        first |= TAG_CRC;
    }
    out.push(first);
    if long {
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    } else {
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    }
    if with_crc {
        out.extend_from_slice(&crc::checksum(body));
    }
    out.extend_from_slice(body);
    Ok(out)
}

/// Decode one TLV frame, returning the cleared 6-bit tag and a body view.
///
/// The returned slice borrows from `buf`; nothing is copied. Truncated input
/// and checksum mismatches are reported without consuming anything.
pub fn decode(buf: &[u8]) -> Result<(u8, &[u8])> {
    let (tag, consumed, body) = decode_next(buf)?;
    debug_assert!(consumed <= buf.len());
    Ok((tag, body))
}

/// Decode one TLV frame and also report how many bytes it occupied, so a
/// caller can walk a buffer holding several frames back to back.
pub fn decode_next(buf: &[u8]) -> Result<(u8, usize, &[u8])> {
    if buf.len() < 2 {
        return Err(RoomwireError::TruncatedFrame {
            needed: 2,
            have: buf.len(),
        });
    }
    let first = buf[0];
    let len_size = if first & TAG_LONG != 0 { 4 } else { 2 };
    let crc_size = if first & TAG_CRC != 0 { 2 } else { 0 };
    let header = 1 + len_size + crc_size;
    if buf.len() < 1 + len_size {
        return Err(RoomwireError::TruncatedFrame {
            needed: 1 + len_size,
            have: buf.len(),
        });
    }
    let len = if len_size == 2 {
        u16::from_be_bytes([buf[1], buf[2]]) as usize
    } else {
        u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize
    };
    if buf.len() < header + len {
        return Err(RoomwireError::TruncatedFrame {
            needed: header + len,
            have: buf.len(),
        });
    }
    let body = &buf[header..header + len];
    if crc_size > 0 && !crc::verify(body, &buf[header - 2..header]) {
        return Err(RoomwireError::IntegrityMismatch);
    }
    Ok((first & TAG_MASK, header + len, body))
}

/// Quick test for whether a buffer starts with a decodable TLV frame.
pub fn is_tlv_frame(buf: &[u8]) -> bool {
    decode(buf).is_ok()
}

// Typed value helpers. Scalars travel as fixed-width Big Endian bodies with
// the checksum always on, so every scalar frame is exactly
// `VALUE_HEADER_SIZE + width` bytes.

/// Encode an i64 value frame (tag `INT64`).
pub fn from_i64(v: i64) -> Vec<u8> {
    encode(tag::INT64, &v.to_be_bytes(), TlvOptions::with_crc())
        .expect("8-byte body always encodes")
}

/// Encode a u64 value frame (tag `UINT64`).
pub fn from_u64(v: u64) -> Vec<u8> {
    encode(tag::UINT64, &v.to_be_bytes(), TlvOptions::with_crc())
        .expect("8-byte body always encodes")
}

/// Encode an f64 value frame (tag `FLOAT64`).
pub fn from_f64(v: f64) -> Vec<u8> {
    encode(tag::FLOAT64, &v.to_bits().to_be_bytes(), TlvOptions::with_crc())
        .expect("8-byte body always encodes")
}

/// Encode a single byte (tag `UINT8`).
pub fn from_byte(v: u8) -> Vec<u8> {
    encode(tag::UINT8, &[v], TlvOptions::with_crc()).expect("1-byte body always encodes")
}

/// Encode a string value frame (tag `STRING`).
pub fn from_str(v: &str) -> Result<Vec<u8>> {
    encode(tag::STRING, v.as_bytes(), TlvOptions::with_crc())
}

/// Encode a serde value as a JSON frame (tag `JSON`).
pub fn from_json<T: serde::Serialize>(v: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(v)?;
    encode(tag::JSON, &body, TlvOptions::with_crc())
}

/// Encode the nil frame (tag `NIL`, empty body).
pub fn from_nil() -> Vec<u8> {
    encode(tag::NIL, &[], TlvOptions::with_crc()).expect("empty body always encodes")
}

fn expect_scalar(buf: &[u8], want: u8, width: usize) -> Result<&[u8]> {
    let (t, body) = decode(buf)?;
    if t != want {
        return Err(RoomwireError::ValueType {
            expected: want,
            got: t,
        });
    }
    if body.len() != width {
        return Err(RoomwireError::TruncatedFrame {
            needed: width,
            have: body.len(),
        });
    }
    Ok(body)
}

/// Decode an i64 value frame. Wrong tag is a typed error, never a panic.
pub fn to_i64(buf: &[u8]) -> Result<i64> {
    let body = expect_scalar(buf, tag::INT64, 8)?;
    Ok(i64::from_be_bytes(body.try_into().expect("checked width")))
}

/// Decode a u64 value frame.
pub fn to_u64(buf: &[u8]) -> Result<u64> {
    let body = expect_scalar(buf, tag::UINT64, 8)?;
    Ok(u64::from_be_bytes(body.try_into().expect("checked width")))
}

/// Decode an f64 value frame.
pub fn to_f64(buf: &[u8]) -> Result<f64> {
    let body = expect_scalar(buf, tag::FLOAT64, 8)?;
    Ok(f64::from_bits(u64::from_be_bytes(
        body.try_into().expect("checked width"),
    )))
}

/// Decode a string value frame.
pub fn to_string(buf: &[u8]) -> Result<String> {
    let (t, body) = decode(buf)?;
    if t != tag::STRING {
        return Err(RoomwireError::ValueType {
            expected: tag::STRING,
            got: t,
        });
    }
    String::from_utf8(body.to_vec())
        .map_err(|e| RoomwireError::Protocol(format!("string frame not utf-8: {}", e)))
}

/// Decode a JSON frame into a serde type.
pub fn to_json<T: serde::de::DeserializeOwned>(buf: &[u8]) -> Result<T> {
    let (t, body) = decode(buf)?;
    if t != tag::JSON {
        return Err(RoomwireError::ValueType {
            expected: tag::JSON,
            got: t,
        });
    }
    Ok(serde_json::from_slice(body)?)
}
