//! Transport boundary and the per-connection read/write loops.
//!
//! The protocol core is transport-agnostic: anything that can move framed
//! messages works, via [`MessageReader`] and [`MessageWriter`]. A plain
//! byte-stream adapter is provided for `AsyncRead`/`AsyncWrite` pairs with
//! a 5-byte preamble per message:
//!
//! ```text
//! ┌────────┬─────────┬─────────┐
//! │ Kind   │ Length  │ Payload │
//! │ 1 byte │ 4 bytes │ N bytes │
//! └────────┴─────────┴─────────┘
//! ```
//!
//! Every logical message travels through the slice transport, single-chunk
//! when it fits, so the reader has exactly one wire shape to parse.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::config::{ChannelConfig, TransportConfig};
use crate::dispatch::ServiceRegistry;
use crate::error::{Result, RoomwireError};
use crate::message::Envelope;
use crate::registry::{Registry, LOBBY_ROOM};
use crate::slice::chunk::{Chunk, CHUNK_CRC};
use crate::slice::{split, NameAllocator, Reassembler, KIND_BINARY, KIND_TEXT};

/// Largest transport frame the byte-stream adapter will accept.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Transport message kinds, mirroring the usual duplex-socket opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

impl MessageKind {
    pub fn code(self) -> u8 {
        match self {
            MessageKind::Text => 1,
            MessageKind::Binary => 2,
            MessageKind::Close => 8,
            MessageKind::Ping => 9,
            MessageKind::Pong => 10,
        }
    }

    pub fn from_code(code: u8) -> Result<MessageKind> {
        Ok(match code {
            1 => MessageKind::Text,
            2 => MessageKind::Binary,
            8 => MessageKind::Close,
            9 => MessageKind::Ping,
            10 => MessageKind::Pong,
            other => {
                return Err(RoomwireError::Protocol(format!(
                    "unknown message kind {}",
                    other
                )))
            }
        })
    }
}

/// Inbound half of a transport. `Ok(None)` is a clean end of stream.
#[async_trait]
pub trait MessageReader: Send {
    async fn read_message(&mut self) -> Result<Option<(MessageKind, Bytes)>>;
}

/// Outbound half of a transport.
#[async_trait]
pub trait MessageWriter: Send {
    async fn write_message(&mut self, kind: MessageKind, payload: &[u8]) -> Result<()>;
}

/// Byte-stream reader with the 5-byte preamble.
pub struct IoReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin + Send> IoReader<R> {
    pub fn new(inner: R) -> Self {
        IoReader { inner }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageReader for IoReader<R> {
    async fn read_message(&mut self) -> Result<Option<(MessageKind, Bytes)>> {
        let mut preamble = [0u8; 5];
        match self.inner.read_exact(&mut preamble).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let kind = MessageKind::from_code(preamble[0])?;
        let len = u32::from_be_bytes([preamble[1], preamble[2], preamble[3], preamble[4]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(RoomwireError::Protocol(format!(
                "frame of {} bytes exceeds limit",
                len
            )));
        }
        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;
        Ok(Some((kind, Bytes::from(payload))))
    }
}

/// Byte-stream writer with the 5-byte preamble.
pub struct IoWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> IoWriter<W> {
    pub fn new(inner: W) -> Self {
        IoWriter { inner }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageWriter for IoWriter<W> {
    async fn write_message(&mut self, kind: MessageKind, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(RoomwireError::ValueTooLarge(payload.len()));
        }
        let mut preamble = [0u8; 5];
        preamble[0] = kind.code();
        preamble[1..].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        self.inner.write_all(&preamble).await?;
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

/// Connection lifecycle callbacks. All default to no-ops.
pub trait ConnectionEvents: Send + Sync + 'static {
    fn on_open(&self, _channel: &Channel) {}
    /// An unsolicited inbound message (broadcast push or anything that is
    /// neither a call nor a reply).
    fn on_push(&self, _channel: &Channel, _envelope: Envelope) {}
    /// A recoverable protocol error on this connection. The read loop
    /// keeps going.
    fn on_error(&self, _channel: &Channel, _error: &RoomwireError) {}
    fn on_close(&self, _channel: &Channel) {}
}

/// Silent event sink.
pub struct NoEvents;

impl ConnectionEvents for NoEvents {}

/// Per-connection settings.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub channel: ChannelConfig,
    pub transport: TransportConfig,
}

/// A live connection: its channel plus the spawned read and write loops.
pub struct Connection {
    channel: Channel,
}

impl Connection {
    /// Wire a transport up: build the channel, register it into the lobby
    /// of `registry` when one is given, and spawn the read and write
    /// loops. Must be called from within a tokio runtime.
    pub fn spawn<R, W>(
        reader: R,
        writer: W,
        user_id: i64,
        services: Arc<ServiceRegistry>,
        registry: Option<Arc<Registry>>,
        events: Arc<dyn ConnectionEvents>,
        config: ConnectionConfig,
    ) -> Connection
    where
        R: MessageReader + 'static,
        W: MessageWriter + 'static,
    {
        let (channel, outbound) = Channel::new(user_id, config.channel);
        if let Some(reg) = &registry {
            reg.put(user_id, LOBBY_ROOM, Arc::new(channel.clone()));
        }
        events.on_open(&channel);

        tokio::spawn(write_loop(
            writer,
            outbound,
            config.transport.chunk_size,
            channel.closed(),
        ));
        tokio::spawn(read_loop(
            reader,
            channel.clone(),
            services,
            registry,
            events,
            config.transport.max_message_size,
        ));

        Connection { channel }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Close the connection, releasing any pending call.
    pub fn close(&self) {
        self.channel.close();
    }
}

async fn write_loop<W: MessageWriter>(
    mut writer: W,
    mut outbound: mpsc::Receiver<Bytes>,
    chunk_size: usize,
    closed: CancellationToken,
) {
    let names = NameAllocator::new();
    loop {
        let message = tokio::select! {
            _ = closed.cancelled() => break,
            m = outbound.recv() => match m {
                Some(m) => m,
                None => break,
            },
        };
        let chunks = match split(names.next(), &message, chunk_size, KIND_BINARY | CHUNK_CRC) {
            Ok(c) => c,
            Err(e) => {
                warn!(len = message.len(), error = %e, "dropping unsendable message");
                continue;
            }
        };
        for chunk in &chunks {
            if let Err(e) = writer
                .write_message(MessageKind::Binary, &chunk.encode())
                .await
            {
                debug!(error = %e, "write failed, closing");
                closed.cancel();
                return;
            }
        }
    }
    let _ = writer.write_message(MessageKind::Close, &[]).await;
}

async fn read_loop<R: MessageReader>(
    mut reader: R,
    channel: Channel,
    services: Arc<ServiceRegistry>,
    registry: Option<Arc<Registry>>,
    events: Arc<dyn ConnectionEvents>,
    max_message_size: usize,
) {
    let closed = channel.closed();
    let mut reassembler = Reassembler::new(max_message_size);
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            f = reader.read_message() => f,
        };
        match frame {
            Ok(Some((MessageKind::Ping, _))) | Ok(Some((MessageKind::Pong, _))) => continue,
            Ok(Some((MessageKind::Close, _))) | Ok(None) => break,
            Ok(Some((kind, bytes))) => {
                let wire_kind = match kind {
                    MessageKind::Text => KIND_TEXT,
                    _ => KIND_BINARY,
                };
                if let Err(e) = consume_frame(
                    wire_kind,
                    &bytes,
                    &mut reassembler,
                    &channel,
                    &services,
                    &events,
                ) {
                    events.on_error(&channel, &e);
                    reassembler.reset();
                }
            }
            Err(e) => {
                events.on_error(&channel, &e);
                break;
            }
        }
    }
    channel.close();
    if let Some(reg) = &registry {
        reg.delete_channel(channel.user_id());
    }
    events.on_close(&channel);
}

/// Decode one transport frame through reassembly and classification.
fn consume_frame(
    wire_kind: u8,
    bytes: &[u8],
    reassembler: &mut Reassembler,
    channel: &Channel,
    services: &Arc<ServiceRegistry>,
    events: &Arc<dyn ConnectionEvents>,
) -> Result<()> {
    let chunk = Chunk::from_wire(wire_kind, bytes)?;
    let message = match reassembler.push(chunk)? {
        Some(m) => m,
        None => return Ok(()),
    };
    let envelope = Envelope::decode(&message)?;
    if envelope.is_reply() {
        channel.offer_reply(envelope);
    } else if envelope.is_call() {
        let services = Arc::clone(services);
        let channel = channel.clone();
        tokio::spawn(async move {
            let outcome = services
                .dispatch(&envelope.method, Bytes::from(envelope.data))
                .await;
            let sent = match outcome {
                Ok(data) => channel.reply_success(envelope.id, data),
                Err(e) => channel.reply_error(envelope.id, e.to_string()),
            };
            if let Err(e) = sent {
                debug!(error = %e, "failed to encode reply");
            }
        });
    } else {
        events.on_push(channel, envelope);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_io_adapter_roundtrip() {
        let (a, b) = tokio::io::duplex(4096);
        let mut writer = IoWriter::new(a);
        let mut reader = IoReader::new(b);

        writer
            .write_message(MessageKind::Binary, b"payload")
            .await
            .unwrap();
        writer.write_message(MessageKind::Text, b"{}").await.unwrap();

        let (kind, bytes) = reader.read_message().await.unwrap().unwrap();
        assert_eq!(kind, MessageKind::Binary);
        assert_eq!(bytes.as_ref(), b"payload");
        let (kind, bytes) = reader.read_message().await.unwrap().unwrap();
        assert_eq!(kind, MessageKind::Text);
        assert_eq!(bytes.as_ref(), b"{}");
    }

    #[tokio::test]
    async fn test_io_reader_clean_eof() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let mut reader = IoReader::new(b);
        assert!(reader.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_io_reader_rejects_unknown_kind() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(&[0xEE, 0, 0, 0, 0]).await.unwrap();
        let mut reader = IoReader::new(b);
        assert!(matches!(
            reader.read_message().await,
            Err(RoomwireError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_io_reader_rejects_oversize_frame() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut preamble = [0u8; 5];
        preamble[0] = MessageKind::Binary.code();
        preamble[1..].copy_from_slice(&(u32::MAX).to_be_bytes());
        a.write_all(&preamble).await.unwrap();
        let mut reader = IoReader::new(b);
        assert!(matches!(
            reader.read_message().await,
            Err(RoomwireError::Protocol(_))
        ));
    }
}
