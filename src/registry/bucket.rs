//! Buckets (shards) and the registry that owns them.
//!
//! A user id always hashes to the same bucket, so every operation touching
//! one user contends only on that bucket's lock. Broadcasts are handed to a
//! fixed pool of worker tasks per bucket; a full worker queue drops the job
//! rather than blocking the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{BucketConfig, RegistryConfig};
use crate::registry::room::{Arena, Node, Room, LOBBY_ROOM, NO_ROOM};
use crate::registry::Member;

struct Job {
    room_id: i64,
    message: Bytes,
}

struct BucketState {
    users: HashMap<i64, usize>,
    rooms: HashMap<i64, Room>,
    arena: Arena,
}

/// One shard of the registry.
pub struct Bucket {
    state: Arc<RwLock<BucketState>>,
    workers: Vec<mpsc::Sender<Job>>,
    next_worker: AtomicUsize,
}

fn read(state: &RwLock<BucketState>) -> RwLockReadGuard<'_, BucketState> {
    state.read().unwrap_or_else(|p| p.into_inner())
}

fn write(state: &RwLock<BucketState>) -> RwLockWriteGuard<'_, BucketState> {
    state.write().unwrap_or_else(|p| p.into_inner())
}

impl Bucket {
    /// Build a bucket and spawn its broadcast workers. Must be called from
    /// within a tokio runtime.
    pub fn new(config: &BucketConfig) -> Self {
        let state = Arc::new(RwLock::new(BucketState {
            users: HashMap::with_capacity(config.map_capacity),
            rooms: HashMap::with_capacity(config.map_capacity),
            arena: Arena::new(),
        }));

        let mut workers = Vec::with_capacity(config.worker_count);
        for _ in 0..config.worker_count.max(1) {
            let (tx, mut rx) = mpsc::channel::<Job>(config.worker_queue_depth.max(1));
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    let guard = read(&state);
                    if let Some(room) = guard.rooms.get(&job.room_id) {
                        room.push(&guard.arena, &job.message);
                    }
                }
            });
            workers.push(tx);
        }

        Bucket {
            state,
            workers,
            next_worker: AtomicUsize::new(0),
        }
    }

    /// Register `member` under `user_id` and link it into `room_id`.
    ///
    /// No-op if the user is already in that room. A user currently in a
    /// different room is moved: unlinked first, which may tombstone the
    /// old room if it empties.
    pub fn put(&self, user_id: i64, room_id: i64, member: Arc<dyn Member>) {
        let mut guard = write(&self.state);
        let state = &mut *guard;

        let idx = match state.users.get(&user_id).copied() {
            Some(idx) => {
                let current = state.arena.get(idx).map(|n| n.room_id).unwrap_or(NO_ROOM);
                if current == room_id {
                    return;
                }
                if current != NO_ROOM {
                    unlink_from_room(state, idx, current);
                }
                if let Some(n) = state.arena.get_mut(idx) {
                    n.member = member;
                }
                idx
            }
            None => {
                let idx = state.arena.insert(Node {
                    user_id,
                    room_id: NO_ROOM,
                    prev: None,
                    next: None,
                    member,
                });
                state.users.insert(user_id, idx);
                idx
            }
        };

        if room_id == NO_ROOM {
            return;
        }

        let room = resolve_room(&mut state.rooms, room_id);
        room.link_front(&mut state.arena, idx);
    }

    /// Move the user back to the lobby room. No-op if the user is unknown
    /// or not in any room.
    pub fn quit(&self, user_id: i64) {
        let mut guard = write(&self.state);
        let state = &mut *guard;

        let idx = match state.users.get(&user_id).copied() {
            Some(idx) => idx,
            None => return,
        };
        let current = state.arena.get(idx).map(|n| n.room_id).unwrap_or(NO_ROOM);
        if current == NO_ROOM {
            return;
        }
        if current != LOBBY_ROOM {
            unlink_from_room(state, idx, current);
            let lobby = resolve_room(&mut state.rooms, LOBBY_ROOM);
            lobby.link_front(&mut state.arena, idx);
        }
    }

    /// Remove the user entirely. Returns whether its room was tombstoned.
    pub fn delete_channel(&self, user_id: i64) -> bool {
        let mut guard = write(&self.state);
        let state = &mut *guard;

        let idx = match state.users.remove(&user_id) {
            Some(idx) => idx,
            None => return false,
        };
        let current = state.arena.get(idx).map(|n| n.room_id).unwrap_or(NO_ROOM);
        let tombstoned = if current != NO_ROOM {
            unlink_from_room(state, idx, current)
        } else {
            false
        };
        state.arena.remove(idx);
        tombstoned
    }

    /// Queue a broadcast to every member of `room_id`. Worker selection is
    /// round-robin; a full worker queue drops the broadcast.
    pub fn broadcast_room(&self, room_id: i64, message: Bytes) {
        let i = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        if self.workers[i].try_send(Job { room_id, message }).is_err() {
            debug!(room_id, worker = i, "broadcast worker queue full, dropping");
        }
    }

    /// The room the user is currently in, if any.
    pub fn room_of(&self, user_id: i64) -> Option<i64> {
        let guard = read(&self.state);
        let idx = guard.users.get(&user_id).copied()?;
        let room_id = guard.arena.get(idx)?.room_id;
        (room_id != NO_ROOM).then_some(room_id)
    }

    /// Member count of `room_id` in this bucket. `None` for unknown rooms.
    pub fn room_online(&self, room_id: i64) -> Option<usize> {
        read(&self.state).rooms.get(&room_id).map(|r| r.online)
    }

    /// Whether the user is registered in this bucket.
    pub fn contains(&self, user_id: i64) -> bool {
        read(&self.state).users.contains_key(&user_id)
    }

    /// Member ids of `room_id` in list order, head first.
    pub fn room_members(&self, room_id: i64) -> Vec<i64> {
        let guard = read(&self.state);
        guard
            .rooms
            .get(&room_id)
            .map(|r| r.member_ids(&guard.arena))
            .unwrap_or_default()
    }
}

/// Fetch the room, creating it on first use. A tombstoned entry that
/// escaped cleanup is replaced with a fresh room.
fn resolve_room(rooms: &mut HashMap<i64, Room>, room_id: i64) -> &mut Room {
    let room = rooms.entry(room_id).or_insert_with(|| Room::new(room_id));
    if room.dropped {
        warn!(room_id, "stale tombstoned room in map, replacing");
        *room = Room::new(room_id);
    }
    room
}

/// Unlink a member record from its room. Empties tombstone the room and
/// remove it from the map, except for the lobby, which merely goes quiet.
/// Returns whether the room was tombstoned.
fn unlink_from_room(state: &mut BucketState, idx: usize, room_id: i64) -> bool {
    let room = match state.rooms.get_mut(&room_id) {
        Some(r) => r,
        None => return false,
    };
    room.unlink(&mut state.arena, idx);
    if room.online == 0 && room_id != LOBBY_ROOM {
        room.dropped = true;
        state.rooms.remove(&room_id);
        return true;
    }
    false
}

/// The full sharded registry.
pub struct Registry {
    buckets: Vec<Bucket>,
}

impl Registry {
    /// Build the bucket pool and all broadcast workers. Must be called
    /// from within a tokio runtime.
    pub fn new(config: &RegistryConfig) -> Self {
        let count = config.bucket_count.max(1);
        let buckets = (0..count).map(|_| Bucket::new(&config.bucket)).collect();
        Registry { buckets }
    }

    /// Deterministic shard selection: a fixed 32-bit hash of the decimal
    /// string form of the user id, modulo the bucket count.
    pub fn bucket_index(&self, user_id: i64) -> usize {
        let key = user_id.to_string();
        crc32c::crc32c(key.as_bytes()) as usize % self.buckets.len()
    }

    /// The bucket owning `user_id`.
    pub fn bucket(&self, user_id: i64) -> &Bucket {
        &self.buckets[self.bucket_index(user_id)]
    }

    pub fn put(&self, user_id: i64, room_id: i64, member: Arc<dyn Member>) {
        self.bucket(user_id).put(user_id, room_id, member);
    }

    pub fn quit(&self, user_id: i64) {
        self.bucket(user_id).quit(user_id);
    }

    pub fn delete_channel(&self, user_id: i64) -> bool {
        self.bucket(user_id).delete_channel(user_id)
    }

    /// Fan a broadcast out to every bucket holding members of `room_id`.
    /// Members of one logical room are spread across buckets because they
    /// shard by user id.
    pub fn broadcast_room(&self, room_id: i64, message: Bytes) {
        for bucket in &self.buckets {
            bucket.broadcast_room(room_id, message.clone());
        }
    }

    pub fn room_of(&self, user_id: i64) -> Option<i64> {
        self.bucket(user_id).room_of(user_id)
    }

    /// Total member count of `room_id` across all buckets.
    pub fn room_online(&self, room_id: i64) -> usize {
        self.buckets
            .iter()
            .filter_map(|b| b.room_online(room_id))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Sink {
        pushes: AtomicUsize,
    }

    impl Sink {
        fn new() -> Arc<Self> {
            Arc::new(Sink {
                pushes: AtomicUsize::new(0),
            })
        }
    }

    impl Member for Sink {
        fn push(&self, _message: Bytes) {
            self.pushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bucket() -> Bucket {
        Bucket::new(&BucketConfig {
            worker_count: 2,
            worker_queue_depth: 4,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_put_then_move_tombstones_old_room() {
        let b = bucket();
        b.put(1, 100, Sink::new());
        assert_eq!(b.room_of(1), Some(100));
        assert_eq!(b.room_online(100), Some(1));

        b.put(1, 200, Sink::new());
        assert_eq!(b.room_of(1), Some(200));
        // Room 100 emptied, so it was tombstoned and removed.
        assert_eq!(b.room_online(100), None);
        assert_eq!(b.room_online(200), Some(1));
    }

    #[tokio::test]
    async fn test_put_same_room_is_noop() {
        let b = bucket();
        b.put(1, 100, Sink::new());
        b.put(1, 100, Sink::new());
        assert_eq!(b.room_online(100), Some(1));
        assert_eq!(b.room_members(100), vec![1]);
    }

    #[tokio::test]
    async fn test_quit_moves_to_lobby() {
        let b = bucket();
        b.put(1, 100, Sink::new());
        b.quit(1);
        assert_eq!(b.room_of(1), Some(LOBBY_ROOM));
        assert_eq!(b.room_online(LOBBY_ROOM), Some(1));
        assert_eq!(b.room_online(100), None);
    }

    #[tokio::test]
    async fn test_quit_unknown_user_is_noop() {
        let b = bucket();
        b.quit(42);
        assert_eq!(b.room_online(LOBBY_ROOM), None);
    }

    #[tokio::test]
    async fn test_delete_channel_reports_tombstone() {
        let b = bucket();
        b.put(1, 100, Sink::new());
        b.put(2, 100, Sink::new());
        assert!(!b.delete_channel(1));
        assert!(b.delete_channel(2));
        assert!(!b.contains(1));
        assert_eq!(b.room_online(100), None);
    }

    #[tokio::test]
    async fn test_lobby_survives_emptying() {
        let b = bucket();
        b.put(1, LOBBY_ROOM, Sink::new());
        assert!(!b.delete_channel(1));
        assert_eq!(b.room_online(LOBBY_ROOM), Some(0));
    }

    #[tokio::test]
    async fn test_online_count_matches_list_after_churn() {
        let b = bucket();
        for user in 1..=8 {
            b.put(user, 100, Sink::new());
        }
        b.quit(3);
        b.delete_channel(5);
        b.put(7, 200, Sink::new());

        for room in [LOBBY_ROOM, 100, 200] {
            if let Some(online) = b.room_online(room) {
                assert_eq!(online, b.room_members(room).len(), "room {}", room);
            }
        }
        assert_eq!(b.room_online(100), Some(5));
        assert_eq!(b.room_online(200), Some(1));
        assert_eq!(b.room_online(LOBBY_ROOM), Some(1));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_members() {
        let b = bucket();
        let s1 = Sink::new();
        let s2 = Sink::new();
        let s3 = Sink::new();
        b.put(1, 100, s1.clone());
        b.put(2, 100, s2.clone());
        b.put(3, 999, s3.clone());

        b.broadcast_room(100, Bytes::from_static(b"hi"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(s1.pushes.load(Ordering::SeqCst), 1);
        assert_eq!(s2.pushes.load(Ordering::SeqCst), 1);
        assert_eq!(s3.pushes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_broadcast_unknown_room_is_noop() {
        let b = bucket();
        b.broadcast_room(5, Bytes::from_static(b"x"));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_registry_sharding_is_deterministic() {
        let r = Registry::new(&RegistryConfig {
            bucket_count: 8,
            bucket: BucketConfig {
                worker_count: 1,
                ..Default::default()
            },
        });
        for user in [0i64, 1, 42, -7, i64::MAX, i64::MIN] {
            let first = r.bucket_index(user);
            for _ in 0..10 {
                assert_eq!(r.bucket_index(user), first);
            }
            assert!(first < 8);
        }
    }

    #[tokio::test]
    async fn test_registry_room_spans_buckets() {
        let r = Registry::new(&RegistryConfig {
            bucket_count: 4,
            bucket: BucketConfig {
                worker_count: 1,
                worker_queue_depth: 8,
                ..Default::default()
            },
        });
        let sinks: Vec<_> = (1..=20i64)
            .map(|user| {
                let s = Sink::new();
                r.put(user, 100, s.clone());
                s
            })
            .collect();
        assert_eq!(r.room_online(100), 20);

        r.broadcast_room(100, Bytes::from_static(b"all"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        for s in &sinks {
            assert_eq!(s.pushes.load(Ordering::SeqCst), 1);
        }
    }
}
