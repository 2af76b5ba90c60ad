//! The correlation channel: synchronous-looking RPC over one duplex
//! connection.
//!
//! One channel wraps one connection. Outbound frames go through a bounded
//! write queue drained by the connection's write loop. Inbound replies go
//! through a bounded reply queue consumed by the lone outstanding `call`.
//! At most one call is in flight per channel; the reply receiver doubles as
//! the call lock, so a reply can never be routed to the wrong waiter.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::id::next_id;
use crate::config::ChannelConfig;
use crate::error::{Result, RoomwireError};
use crate::message::Envelope;
use crate::registry::Member;

struct Inner {
    user_id: AtomicI64,
    config: ChannelConfig,
    outbound: mpsc::Sender<Bytes>,
    reply_tx: mpsc::Sender<Envelope>,
    /// Locking the receiver is acquiring the call lock.
    replies: Mutex<mpsc::Receiver<Envelope>>,
    closed: CancellationToken,
}

/// Cloneable handle to one connection's RPC state.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    /// Build a channel. The returned receiver is the write queue; the
    /// connection's write loop must drain it onto the transport.
    pub fn new(user_id: i64, config: ChannelConfig) -> (Channel, mpsc::Receiver<Bytes>) {
        let depth = config.queue_depth.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(depth);
        let (reply_tx, reply_rx) = mpsc::channel(depth);
        let channel = Channel {
            inner: Arc::new(Inner {
                user_id: AtomicI64::new(user_id),
                config,
                outbound: outbound_tx,
                reply_tx,
                replies: Mutex::new(reply_rx),
                closed: CancellationToken::new(),
            }),
        };
        (channel, outbound_rx)
    }

    pub fn user_id(&self) -> i64 {
        self.inner.user_id.load(Ordering::Relaxed)
    }

    /// Bind the authenticated user id, once login resolves it.
    pub fn set_user_id(&self, user_id: i64) {
        self.inner.user_id.store(user_id, Ordering::Relaxed);
    }

    /// Token cancelled when the connection closes.
    pub fn closed(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    /// Mark the connection closed, releasing any pending call with a
    /// connection-closed error.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Issue a request and wait for its reply.
    ///
    /// Serialized per channel: a second caller waits for the first to
    /// finish. The request is enqueued within `write_wait` or the call
    /// fails with [`RoomwireError::CallTimeout`]; the reply must land
    /// within `reply_timeout` or the call fails with
    /// [`RoomwireError::ReplyTimeout`]. Firing `cancel` releases the
    /// waiter immediately, but a request already handed to the write
    /// queue is not retracted.
    pub async fn call(
        &self,
        method: &str,
        args: Vec<u8>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<u8>> {
        let mut replies = self.inner.replies.lock().await;
        if self.is_closed() {
            return Err(RoomwireError::ConnectionClosed);
        }

        // A previous call that timed out may have left its late reply in
        // the queue. It belongs to no one now.
        while let Ok(stale) = replies.try_recv() {
            debug!(id = stale.id, "discarding stale reply");
        }

        let id = next_id();
        let frame = Bytes::from(Envelope::call(id, method, args).encode()?);
        match tokio::time::timeout(self.inner.config.write_wait, self.inner.outbound.send(frame))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(RoomwireError::ConnectionClosed),
            Err(_) => return Err(RoomwireError::CallTimeout),
        }

        let deadline = tokio::time::sleep(self.inner.config.reply_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return Err(RoomwireError::ReplyTimeout),
                _ = self.inner.closed.cancelled() => return Err(RoomwireError::ConnectionClosed),
                _ = cancelled(cancel) => return Err(RoomwireError::Cancelled),
                reply = replies.recv() => match reply {
                    None => return Err(RoomwireError::ConnectionClosed),
                    Some(env) if env.id == id => {
                        return if env.error.is_empty() {
                            Ok(env.data)
                        } else {
                            Err(RoomwireError::Remote(env.error))
                        };
                    }
                    Some(env) => {
                        // Single outstanding call makes this unreachable in
                        // a well-behaved peer; drop rather than misdeliver.
                        warn!(got = env.id, want = id, "mismatched reply id, dropping");
                    }
                },
            }
        }
    }

    /// Non-blocking enqueue of an already-encoded outbound message.
    /// Dropped when the write queue is full; push delivery is best-effort.
    pub fn push(&self, message: Bytes) {
        if self.inner.outbound.try_send(message).is_err() {
            debug!(user_id = self.user_id(), "write queue full, dropping push");
        }
    }

    /// Enqueue a successful reply to an inbound call. Drop-on-full.
    pub fn reply_success(&self, id: u64, data: Vec<u8>) -> Result<()> {
        let frame = Bytes::from(Envelope::reply(id, data).encode()?);
        self.push(frame);
        Ok(())
    }

    /// Enqueue a failed reply to an inbound call. Drop-on-full.
    pub fn reply_error(&self, id: u64, err: impl Into<String>) -> Result<()> {
        let frame = Bytes::from(Envelope::reply_error(id, err).encode()?);
        self.push(frame);
        Ok(())
    }

    /// Hand an inbound reply envelope to the waiting caller. Called by the
    /// read loop. Drop-on-full: with one call in flight the queue cannot
    /// legitimately fill.
    pub fn offer_reply(&self, envelope: Envelope) {
        if self.inner.reply_tx.try_send(envelope).is_err() {
            debug!(user_id = self.user_id(), "reply queue full, dropping");
        }
    }
}

impl Member for Channel {
    fn push(&self, message: Bytes) {
        Channel::push(self, message);
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(t) => t.cancelled().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::action;
    use std::time::Duration;

    fn channel() -> (Channel, mpsc::Receiver<Bytes>) {
        Channel::new(
            7,
            ChannelConfig {
                queue_depth: 4,
                write_wait: Duration::from_millis(100),
                reply_timeout: Duration::from_millis(500),
            },
        )
    }

    /// Drain one request off the write queue and feed back a reply.
    async fn serve_one(
        ch: Channel,
        mut outbound: mpsc::Receiver<Bytes>,
        respond: impl FnOnce(Envelope) -> Envelope + Send + 'static,
    ) {
        tokio::spawn(async move {
            let frame = outbound.recv().await.unwrap();
            let request = Envelope::decode(&frame).unwrap();
            ch.offer_reply(respond(request));
        });
    }

    #[tokio::test]
    async fn test_call_resolves_matching_reply() {
        let (ch, outbound) = channel();
        serve_one(ch.clone(), outbound, |req| {
            assert_eq!(req.action, action::CALL);
            assert_eq!(req.method, "echo.say");
            Envelope::reply(req.id, req.data)
        })
        .await;

        let out = ch.call("echo.say", b"hi".to_vec(), None).await.unwrap();
        assert_eq!(out, b"hi");
    }

    #[tokio::test]
    async fn test_call_surfaces_remote_error() {
        let (ch, outbound) = channel();
        serve_one(ch.clone(), outbound, |req| {
            Envelope::reply_error(req.id, "boom")
        })
        .await;

        let err = ch.call("svc.m", Vec::new(), None).await.unwrap_err();
        assert!(matches!(err, RoomwireError::Remote(msg) if msg == "boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_reply_timeout() {
        let (ch, _outbound) = channel();
        let err = ch.call("svc.m", Vec::new(), None).await.unwrap_err();
        assert!(matches!(err, RoomwireError::ReplyTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_write_queue_full_times_out() {
        let (ch, _outbound) = channel();
        // Keep the receiver alive but never drain; fill the queue.
        for _ in 0..4 {
            ch.push(Bytes::from_static(b"x"));
        }
        let err = ch.call("svc.m", Vec::new(), None).await.unwrap_err();
        assert!(matches!(err, RoomwireError::CallTimeout));
    }

    #[tokio::test]
    async fn test_call_cancellation() {
        let (ch, _outbound) = channel();
        let cancel = CancellationToken::new();
        let waiter = {
            let ch = ch.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { ch.call("svc.m", Vec::new(), Some(&cancel)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, RoomwireError::Cancelled));
    }

    #[tokio::test]
    async fn test_close_releases_pending_call() {
        let (ch, _outbound) = channel();
        let waiter = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.call("svc.m", Vec::new(), None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ch.close();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, RoomwireError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_mismatched_reply_id_is_dropped() {
        let (ch, mut outbound) = channel();
        {
            let ch = ch.clone();
            tokio::spawn(async move {
                let frame = outbound.recv().await.unwrap();
                let request = Envelope::decode(&frame).unwrap();
                ch.offer_reply(Envelope::reply(request.id + 999, b"wrong".to_vec()));
                ch.offer_reply(Envelope::reply(request.id, b"right".to_vec()));
            });
        }
        let out = ch.call("svc.m", Vec::new(), None).await.unwrap();
        assert_eq!(out, b"right");
    }

    #[tokio::test]
    async fn test_calls_are_serialized() {
        let (ch, mut outbound) = channel();
        {
            let ch = ch.clone();
            tokio::spawn(async move {
                // Requests must arrive one at a time, each answered before
                // the next is sent.
                for _ in 0..2 {
                    let frame = outbound.recv().await.unwrap();
                    let request = Envelope::decode(&frame).unwrap();
                    assert!(outbound.try_recv().is_err());
                    ch.offer_reply(Envelope::reply(request.id, b"ok".to_vec()));
                }
            });
        }
        let a = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.call("svc.a", Vec::new(), None).await })
        };
        let b = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.call("svc.b", Vec::new(), None).await })
        };
        assert_eq!(a.await.unwrap().unwrap(), b"ok");
        assert_eq!(b.await.unwrap().unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_push_drops_when_full() {
        let (ch, mut outbound) = channel();
        for i in 0..10u8 {
            ch.push(Bytes::from(vec![i]));
        }
        // Queue depth is 4; only the first four survive.
        let mut seen = 0;
        while let Ok(frame) = outbound.try_recv() {
            assert_eq!(frame[0], seen);
            seen += 1;
        }
        assert_eq!(seen, 4);
    }
}
