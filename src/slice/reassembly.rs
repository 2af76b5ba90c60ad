//! Per-connection reassembly of chunked messages.
//!
//! Each connection carries at most one logical message in flight, so the
//! reassembler accepts chunks strictly in sequence: the first chunk must
//! have index 0, every following chunk must carry the same name and the
//! next index. Any violation resets the pending state and surfaces an
//! error; the caller keeps reading.

use bytes::Bytes;

use crate::error::{Result, RoomwireError};
use crate::slice::chunk::Chunk;

/// Default cap on a reassembled logical message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Rotating chunk-group name source, cycling `0..=99`.
///
/// Names only disambiguate the single in-flight message per connection, so
/// a tiny rotating space is enough.
#[derive(Debug)]
pub struct NameAllocator {
    next: std::sync::atomic::AtomicU16,
}

impl NameAllocator {
    pub fn new() -> Self {
        NameAllocator {
            next: std::sync::atomic::AtomicU16::new(0),
        }
    }

    /// Hand out the next name, wrapping after 99.
    pub fn next(&self) -> u16 {
        use std::sync::atomic::Ordering;
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let after = if current >= 99 { 0 } else { current + 1 };
            match self
                .next
                .compare_exchange_weak(current, after, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return current,
                Err(seen) => current = seen,
            }
        }
    }
}

impl Default for NameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Pending {
    name: u16,
    total: u8,
    next_index: u8,
    size: u32,
    buf: Vec<u8>,
}

/// Sequential chunk accumulator for one connection.
#[derive(Debug)]
pub struct Reassembler {
    pending: Option<Pending>,
    max_message_size: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Reassembler::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Reassembler {
    /// A reassembler that refuses messages larger than `max_message_size`,
    /// whether declared up front or accumulated chunk by chunk.
    pub fn new(max_message_size: usize) -> Self {
        Reassembler {
            pending: None,
            max_message_size,
        }
    }

    /// Whether a message is partially accumulated.
    pub fn in_flight(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop any partial message.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Feed one chunk. Returns the full message once the final chunk
    /// lands, `None` while more chunks are expected.
    ///
    /// Out-of-order or cross-message chunks reset the pending state and
    /// fail; completion requires both the final index and at least `size`
    /// accumulated bytes.
    pub fn push(&mut self, chunk: Chunk) -> Result<Option<Bytes>> {
        if chunk.total == 0 {
            self.pending = None;
            return Err(RoomwireError::Reassembly("chunk with zero total".into()));
        }

        match &mut self.pending {
            None => {
                if chunk.index != 0 {
                    return Err(RoomwireError::Reassembly(format!(
                        "message {} started at index {}",
                        chunk.name, chunk.index
                    )));
                }
                // Checked before the buffer is sized, so a hostile first
                // chunk cannot force a huge reservation.
                if chunk.size as usize > self.max_message_size {
                    return Err(RoomwireError::Reassembly(format!(
                        "message {} declares {} bytes, limit is {}",
                        chunk.name, chunk.size, self.max_message_size
                    )));
                }
                self.pending = Some(Pending {
                    name: chunk.name,
                    total: chunk.total,
                    next_index: 0,
                    size: chunk.size,
                    buf: Vec::with_capacity(chunk.size as usize),
                });
            }
            Some(p) => {
                if p.name != chunk.name || p.total != chunk.total {
                    let (name, total) = (p.name, p.total);
                    self.pending = None;
                    return Err(RoomwireError::Reassembly(format!(
                        "chunk {}/{} interleaved into message {}/{}",
                        chunk.name, chunk.total, name, total
                    )));
                }
                if chunk.index != p.next_index {
                    let expected = p.next_index;
                    self.pending = None;
                    return Err(RoomwireError::Reassembly(format!(
                        "message {}: expected index {}, got {}",
                        chunk.name, expected, chunk.index
                    )));
                }
                // Later chunks of a message carry the authoritative size too.
                p.size = p.size.max(chunk.size);
                if p.size as usize > self.max_message_size {
                    let (name, size) = (p.name, p.size);
                    self.pending = None;
                    return Err(RoomwireError::Reassembly(format!(
                        "message {} grew to {} bytes, limit is {}",
                        name, size, self.max_message_size
                    )));
                }
            }
        }

        let last = {
            let p = match &mut self.pending {
                Some(p) => p,
                None => return Ok(None),
            };
            p.buf.extend_from_slice(&chunk.data);
            p.next_index += 1;
            // Binary chunks declare only their own length, so the running
            // total needs its own bound.
            if p.buf.len() > self.max_message_size {
                let (name, len) = (p.name, p.buf.len());
                self.pending = None;
                return Err(RoomwireError::Reassembly(format!(
                    "message {} accumulated {} bytes, limit is {}",
                    name, len, self.max_message_size
                )));
            }
            chunk.index == p.total - 1
        };

        if last {
            if let Some(p) = self.pending.take() {
                if (p.buf.len() as u32) < p.size {
                    return Err(RoomwireError::Reassembly(format!(
                        "message {} closed short: {} of {} bytes",
                        p.name,
                        p.buf.len(),
                        p.size
                    )));
                }
                return Ok(Some(Bytes::from(p.buf)));
            }
        }
        Ok(None)
    }
}
