//! Call/reply correlation over one duplex connection.

pub mod channel;
pub mod id;

pub use channel::Channel;
pub use id::next_id;
