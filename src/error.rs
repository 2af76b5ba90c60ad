//! Error types for roomwire.

use thiserror::Error;

/// Main error type for all roomwire operations.
#[derive(Debug, Error)]
pub enum RoomwireError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (wire envelope).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame buffer shorter than its header or declared length.
    #[error("truncated frame: need {needed} bytes, have {have}")]
    TruncatedFrame { needed: usize, have: usize },

    /// Frame checksum did not match the body.
    #[error("frame integrity mismatch")]
    IntegrityMismatch,

    /// Tag code outside the 6-bit range.
    #[error("unsupported tag: {0:#04x}")]
    UnsupportedTag(u8),

    /// Body too large for the length field.
    #[error("value too large: {0} bytes")]
    ValueTooLarge(usize),

    /// Decoding a typed value frame into the wrong type.
    #[error("value type mismatch: expected tag {expected:#04x}, got {got:#04x}")]
    ValueType { expected: u8, got: u8 },

    /// Message needs more chunks than the one-byte index can address.
    #[error("message needs {0} chunks, limit is 255")]
    ChunkOverflow(usize),

    /// Chunk did not belong to the in-flight reassembly.
    #[error("reassembly error: {0}")]
    Reassembly(String),

    /// The outbound queue never accepted the call request.
    #[error("call timeout")]
    CallTimeout,

    /// No matching reply arrived in time.
    #[error("reply timeout")]
    ReplyTimeout,

    /// The caller's cancellation signal fired.
    #[error("call cancelled")]
    Cancelled,

    /// Connection closed while an operation was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// Malformed `"service.method"` name or no such handler.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// The remote side replied with an error payload.
    #[error("remote error: {0}")]
    Remote(String),

    /// Protocol violation (bad envelope, unexpected message kind, ...).
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using RoomwireError.
pub type Result<T> = std::result::Result<T, RoomwireError>;
