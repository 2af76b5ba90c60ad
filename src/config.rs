//! Configuration structs for channels, registry buckets, and transports.
//!
//! Every knob has a production default; construct with `..Default::default()`
//! to override just the fields under test.

use std::time::Duration;

use crate::slice::{DEFAULT_MAX_MESSAGE_SIZE, MAX_CHUNK_SIZE};

/// Tuning for one RPC channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Depth of each of the three inbound queues (pushes, caller requests,
    /// replies). A full queue drops rather than blocks.
    pub queue_depth: usize,
    /// How long an outbound write may sit behind a full queue before the
    /// call fails.
    pub write_wait: Duration,
    /// How long a caller waits for its reply.
    pub reply_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            queue_depth: 10,
            write_wait: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(10),
        }
    }
}

/// Tuning for one registry bucket (shard).
#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Initial capacity of the user and room maps.
    pub map_capacity: usize,
    /// Broadcast worker tasks per bucket.
    pub worker_count: usize,
    /// Queue slots per broadcast worker; a full worker drops the job.
    pub worker_queue_depth: usize,
}

impl Default for BucketConfig {
    fn default() -> Self {
        BucketConfig {
            map_capacity: 1024,
            worker_count: 32,
            worker_queue_depth: 20,
        }
    }
}

/// Tuning for the sharded connection registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Number of buckets; a user id always hashes to the same bucket.
    pub bucket_count: usize,
    pub bucket: BucketConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            bucket_count: 32,
            bucket: BucketConfig::default(),
        }
    }
}

/// Tuning for the framed transport layer.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Largest chunk the slice transport will emit. Clamped by the chunk
    /// codec to its own bounds.
    pub chunk_size: usize,
    /// Largest reassembled logical message accepted from the peer. A chunk
    /// declaring or accumulating more is a reassembly error.
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            chunk_size: MAX_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = ChannelConfig::default();
        assert_eq!(c.queue_depth, 10);
        assert_eq!(c.write_wait, Duration::from_secs(5));
        assert_eq!(c.reply_timeout, Duration::from_secs(10));

        let r = RegistryConfig::default();
        assert_eq!(r.bucket_count, 32);
        assert_eq!(r.bucket.worker_count, 32);
        assert_eq!(r.bucket.worker_queue_depth, 20);

        let t = TransportConfig::default();
        assert_eq!(t.chunk_size, MAX_CHUNK_SIZE);
        assert_eq!(t.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }
}
