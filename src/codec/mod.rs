//! Frame codec - self-describing binary records and correlation frames.
//!
//! Two layouts share the same length/checksum rules:
//! - [`tlv`] - variable header: tag byte, 2/4-byte length, optional CRC
//! - [`correlation`] - fixed 15-byte header carrying a caller-assigned id
//!
//! Malformed or truncated input never partially mutates caller state; every
//! decode path returns an explicit error.

pub mod correlation;
pub mod crc;
pub mod tlv;

pub use correlation::{CorrelationFrame, CORRELATION_HEADER_SIZE};
pub use tlv::{TlvOptions, TAG_CRC, TAG_LONG, TAG_MASK, VALUE_HEADER_SIZE};
