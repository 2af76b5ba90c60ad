//! Chunk descriptor and the `split` half of the slice transport.
//!
//! A logical message that does not fit under the transport frame-size
//! ceiling is cut into at most 255 chunks. Binary wire layout:
//!
//! ```text
//! ┌───────┬─────────┬───────┬───────┬───────────┬──────────┬────────┐
//! │ Tag   │ Name    │ Total │ Index │ Length    │ CRC      │ Data   │
//! │ 1 byte│ 2 bytes │ 1 byte│ 1 byte│ 2|4 bytes │ 0|2 bytes│ N bytes│
//! └───────┴─────────┴───────┴───────┴───────────┴──────────┴────────┘
//! ```
//!
//! Tag bit `0x80` = 4-byte length, bit `0x40` = CRC present, low 6 bits =
//! payload kind. Text chunks may instead travel as a JSON object carrying
//! every descriptor field.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::crc;
use crate::error::{Result, RoomwireError};

/// Payload kind: UTF-8 text.
pub const KIND_TEXT: u8 = 0x01;

/// Payload kind: opaque binary.
pub const KIND_BINARY: u8 = 0x02;

/// Tag bit selecting the 4-byte length field.
pub const CHUNK_LONG: u8 = 0x80;

/// Tag bit marking a CRC over the chunk data.
pub const CHUNK_CRC: u8 = 0x40;

/// Smallest accepted chunk size; smaller requests are clamped up.
pub const MIN_CHUNK_SIZE: usize = 1024;

/// Largest accepted chunk size (2-byte length field); larger requests are
/// clamped down.
pub const MAX_CHUNK_SIZE: usize = 0xFFFF;

/// Maximum chunk count addressable by the one-byte index.
pub const MAX_CHUNKS: usize = 255;

/// One piece of a logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Raw tag byte: kind in the low 6 bits plus the `0x80`/`0x40` flags.
    pub kind: u8,
    /// Reassembly-group identifier, unique only while one logical message
    /// is in flight on a connection.
    pub name: u16,
    /// Chunk count for the whole message.
    pub total: u8,
    /// 0-based position, `< total`.
    pub index: u8,
    /// Total logical message length across all chunks.
    pub size: u32,
    /// This chunk's bytes.
    pub data: Bytes,
}

/// JSON form of a chunk (text transport frames).
#[derive(Debug, Serialize, Deserialize)]
struct ChunkJson {
    #[serde(rename = "p")]
    kind: u8,
    #[serde(rename = "n")]
    name: u16,
    #[serde(rename = "t")]
    total: u8,
    #[serde(rename = "i")]
    index: u8,
    #[serde(rename = "s")]
    size: u32,
    #[serde(rename = "d")]
    data: Vec<u8>,
}

impl Chunk {
    /// Payload kind with the flag bits cleared.
    #[inline]
    pub fn payload_kind(&self) -> u8 {
        self.kind & !(CHUNK_LONG | CHUNK_CRC)
    }

    /// Whether this chunk is the last of its message.
    #[inline]
    pub fn is_last(&self) -> bool {
        self.total > 0 && self.index == self.total - 1
    }

    /// Encode to the binary wire layout.
    ///
    /// The length field carries this chunk's data length; the 4-byte form
    /// and the CRC are chosen from the data size and the tag's `0x40` bit.
    pub fn encode(&self) -> Vec<u8> {
        let tag_kind = self.kind & !(CHUNK_LONG | CHUNK_CRC);
        let long = self.data.len() > 0xFFFF;
        let with_crc = self.kind & CHUNK_CRC != 0;

        let mut tag = tag_kind;
        if long {
            tag |= CHUNK_LONG;
        }
        if with_crc {
            tag |= CHUNK_CRC;
        }

        let len_size = if long { 4 } else { 2 };
        let crc_size = if with_crc { 2 } else { 0 };
        let mut buf = Vec::with_capacity(5 + len_size + crc_size + self.data.len());
        buf.push(tag);
        buf.extend_from_slice(&self.name.to_be_bytes());
        buf.push(self.total);
        buf.push(self.index);
        if long {
            buf.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        } else {
            buf.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        }
        if with_crc {
            buf.extend_from_slice(&crc::checksum(&self.data));
        }
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decode from the binary wire layout.
    ///
    /// The decoded `size` mirrors the length field, i.e. this chunk's data
    /// length - the total message size travels only in the JSON form.
    pub fn decode(buf: &[u8]) -> Result<Chunk> {
        // Shortest possible header: tag + name + total + index + 2-byte length.
        if buf.len() < 7 {
            return Err(RoomwireError::TruncatedFrame {
                needed: 7,
                have: buf.len(),
            });
        }
        let tag = buf[0];
        let long = tag & CHUNK_LONG != 0;
        let with_crc = tag & CHUNK_CRC != 0;
        let len_size = if long { 4usize } else { 2 };
        let crc_size = if with_crc { 2usize } else { 0 };
        let header = 5 + len_size + crc_size;
        if buf.len() < header {
            return Err(RoomwireError::TruncatedFrame {
                needed: header,
                have: buf.len(),
            });
        }
        let len = if long {
            u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize
        } else {
            u16::from_be_bytes([buf[5], buf[6]]) as usize
        };
        if buf.len() < header + len {
            return Err(RoomwireError::TruncatedFrame {
                needed: header + len,
                have: buf.len(),
            });
        }
        let data = &buf[header..header + len];
        if with_crc && !crc::verify(data, &buf[header - 2..header]) {
            return Err(RoomwireError::IntegrityMismatch);
        }
        Ok(Chunk {
            kind: tag,
            name: u16::from_be_bytes([buf[1], buf[2]]),
            total: buf[3],
            index: buf[4],
            size: len as u32,
            data: Bytes::copy_from_slice(data),
        })
    }

    /// Encode to the JSON text form, carrying every descriptor field.
    pub fn encode_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&ChunkJson {
            kind: self.kind,
            name: self.name,
            total: self.total,
            index: self.index,
            size: self.size,
            data: self.data.to_vec(),
        })?)
    }

    /// Decode the JSON text form.
    pub fn decode_json(buf: &[u8]) -> Result<Chunk> {
        let j: ChunkJson = serde_json::from_slice(buf)?;
        Ok(Chunk {
            kind: j.kind,
            name: j.name,
            total: j.total,
            index: j.index,
            size: j.size,
            data: Bytes::from(j.data),
        })
    }

    /// Decode from either wire form, selected by the payload kind of the
    /// surrounding transport frame.
    pub fn from_wire(kind: u8, buf: &[u8]) -> Result<Chunk> {
        match kind {
            KIND_TEXT => Chunk::decode_json(buf),
            KIND_BINARY => Chunk::decode(buf),
            other => Err(RoomwireError::Protocol(format!(
                "invalid chunk message kind: {}",
                other
            ))),
        }
    }
}

/// Split a logical message into ordered chunks.
///
/// `chunk_size` is clamped to `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]`. Fails with
/// [`RoomwireError::ChunkOverflow`] - never silently truncates - when the
/// message needs more than 255 chunks.
pub fn split(name: u16, message: &[u8], chunk_size: usize, kind: u8) -> Result<Vec<Chunk>> {
    let chunk_size = chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
    let total = message.len().div_ceil(chunk_size).max(1);
    if total > MAX_CHUNKS {
        return Err(RoomwireError::ChunkOverflow(total));
    }

    let mut chunks = Vec::with_capacity(total);
    for i in 0..total {
        let start = i * chunk_size;
        let end = (start + chunk_size).min(message.len());
        chunks.push(Chunk {
            kind,
            name,
            total: total as u8,
            index: i as u8,
            size: message.len() as u32,
            data: Bytes::copy_from_slice(&message[start..end]),
        });
    }
    Ok(chunks)
}
