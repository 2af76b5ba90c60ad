//! Fixed-header correlation frames.
//!
//! Used where a caller-assigned numeric id must survive a protocol with its
//! own addressing (multi-device links). Layout:
//!
//! ```text
//! ┌──────────┬─────────┬──────────┬───────┬──────────┬──────────┬────────┐
//! │ Id       │ Address │ Function │ Piece │ Length   │ CRC      │ Body   │
//! │ 8 bytes  │ 1 byte  │ 1 byte   │ 1 byte│ 2 bytes  │ 2 bytes  │ N bytes│
//! │ uint64 BE│         │          │       │ uint16 BE│ uint16 BE│        │
//! └──────────┴─────────┴──────────┴───────┴──────────┴──────────┴────────┘
//! ```
//!
//! The checksum is mandatory, covers the body only, and is always verified
//! on decode.

use bytes::Bytes;

use crate::codec::crc;
use crate::error::{Result, RoomwireError};

/// Header size in bytes (fixed, exactly 15).
pub const CORRELATION_HEADER_SIZE: usize = 15;

const POS_ID: usize = 0;
const POS_ADDRESS: usize = 8;
const POS_FUNCTION: usize = 9;
const POS_PIECE: usize = 10;
const POS_LENGTH: usize = 11;
const POS_CRC: usize = 13;

/// A decoded correlation frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationFrame {
    /// Caller-assigned correlation id.
    pub id: u64,
    /// Link address.
    pub address: u8,
    /// Function code.
    pub function: u8,
    /// Piece index for multi-part payloads.
    pub piece: u8,
    /// Body bytes.
    pub body: Bytes,
}

impl CorrelationFrame {
    /// Create a frame for encoding.
    pub fn new(id: u64, address: u8, function: u8, body: impl Into<Bytes>) -> Self {
        Self {
            id,
            address,
            function,
            piece: 0,
            body: body.into(),
        }
    }

    /// Same frame with a piece index set.
    pub fn with_piece(mut self, piece: u8) -> Self {
        self.piece = piece;
        self
    }

    /// Encode header and body into a contiguous buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.body.len() > u16::MAX as usize {
            return Err(RoomwireError::ValueTooLarge(self.body.len()));
        }
        let mut buf = Vec::with_capacity(CORRELATION_HEADER_SIZE + self.body.len());
        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.push(self.address);
        buf.push(self.function);
        buf.push(self.piece);
        buf.extend_from_slice(&(self.body.len() as u16).to_be_bytes());
        buf.extend_from_slice(&crc::checksum(&self.body));
        buf.extend_from_slice(&self.body);
        Ok(buf)
    }
}

/// Convenience wrapper matching the TLV encode surface.
pub fn encode(id: u64, address: u8, function: u8, body: &[u8]) -> Result<Vec<u8>> {
    CorrelationFrame::new(id, address, function, Bytes::copy_from_slice(body)).encode()
}

/// Number of body bytes a buffer holding at least a header declares.
///
/// Lets a read loop size its receive buffer before the body has arrived.
pub fn declared_body_len(buf: &[u8]) -> Result<u16> {
    if buf.len() < CORRELATION_HEADER_SIZE {
        return Err(RoomwireError::TruncatedFrame {
            needed: CORRELATION_HEADER_SIZE,
            have: buf.len(),
        });
    }
    Ok(u16::from_be_bytes([buf[POS_LENGTH], buf[POS_LENGTH + 1]]))
}

/// Decode a correlation frame, verifying the checksum.
pub fn decode(buf: &[u8]) -> Result<CorrelationFrame> {
    let len = declared_body_len(buf)? as usize;
    let total = CORRELATION_HEADER_SIZE + len;
    if buf.len() < total {
        return Err(RoomwireError::TruncatedFrame {
            needed: total,
            have: buf.len(),
        });
    }
    let body = &buf[CORRELATION_HEADER_SIZE..total];
    if !crc::verify(body, &buf[POS_CRC..POS_CRC + 2]) {
        return Err(RoomwireError::IntegrityMismatch);
    }
    Ok(CorrelationFrame {
        id: u64::from_be_bytes(buf[POS_ID..POS_ID + 8].try_into().expect("checked len")),
        address: buf[POS_ADDRESS],
        function: buf[POS_FUNCTION],
        piece: buf[POS_PIECE],
        body: Bytes::copy_from_slice(body),
    })
}

/// Check whether a buffer holds one complete, checksum-valid frame.
pub fn is_correlation_frame(buf: &[u8]) -> bool {
    decode(buf).is_ok()
}
