//! roomwire: bidirectional RPC over long-lived duplex connections.
//!
//! Many logical request/response exchanges and room broadcasts are
//! multiplexed over a small number of connections. The crate is built
//! from four layers:
//!
//! - [`codec`]: self-describing TLV value frames and fixed-header
//!   correlation frames, with optional CRC integrity checking.
//! - [`slice`]: splits oversized logical messages into chunks that fit
//!   under a transport frame-size ceiling, and reassembles them.
//! - [`registry`]: shards live connections across buckets and groups them
//!   into broadcast rooms.
//! - [`channel`]: turns the asynchronous duplex stream into
//!   synchronous-looking calls with timeout and cancellation, and routes
//!   inbound pushes.
//!
//! [`transport`] ties the layers together with per-connection read and
//! write loops over any framed transport, and [`dispatch`] maps inbound
//! `"service.method"` calls to registered handlers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use roomwire::{
//!     Connection, ConnectionConfig, IoReader, IoWriter, NoEvents, ServiceRegistry,
//! };
//!
//! # async fn run(stream: tokio::io::DuplexStream) -> roomwire::Result<()> {
//! let mut services = ServiceRegistry::new();
//! services.register("echo", "say", |payload: Bytes| async move {
//!     Ok(payload.to_vec())
//! });
//!
//! let (read_half, write_half) = tokio::io::split(stream);
//! let conn = Connection::spawn(
//!     IoReader::new(read_half),
//!     IoWriter::new(write_half),
//!     42,
//!     Arc::new(services),
//!     None,
//!     Arc::new(NoEvents),
//!     ConnectionConfig::default(),
//! );
//! let reply = conn.channel().call("echo.say", b"hi".to_vec(), None).await?;
//! assert_eq!(reply, b"hi");
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod registry;
pub mod slice;
pub mod transport;

pub use channel::Channel;
pub use config::{BucketConfig, ChannelConfig, RegistryConfig, TransportConfig};
pub use dispatch::ServiceRegistry;
pub use error::{Result, RoomwireError};
pub use message::{action, Envelope};
pub use registry::{Bucket, Member, Registry, LOBBY_ROOM, NO_ROOM};
pub use transport::{
    Connection, ConnectionConfig, ConnectionEvents, IoReader, IoWriter, MessageKind,
    MessageReader, MessageWriter, NoEvents,
};
