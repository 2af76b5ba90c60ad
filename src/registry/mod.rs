//! Sharded connection registry: buckets of live connections grouped into
//! broadcast rooms.
//!
//! The registry never touches payload bytes. It routes by user and room
//! identity only, and reaches connections through the [`Member`] capability.

use bytes::Bytes;

pub mod bucket;
pub mod room;

pub use bucket::{Bucket, Registry};
pub use room::{Room, LOBBY_ROOM, NO_ROOM};

/// The one capability the registry needs from a connection: non-blocking
/// delivery of an outbound message. Implementations must drop rather than
/// block when their queue is full.
pub trait Member: Send + Sync + 'static {
    fn push(&self, message: Bytes);
}
