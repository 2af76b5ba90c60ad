//! Rooms and the arena that backs their member lists.
//!
//! Every bucket owns one arena of member records. A room's member list is
//! doubly linked through `prev`/`next` arena indices stored in the records
//! themselves, so prepend and unlink are O(1) and no record is ever moved.
//! Arena indices stay stable until the record is freed.

use std::sync::Arc;

use bytes::Bytes;

use super::Member;

/// The reserved lobby room. Created on first use, never tombstoned.
pub const LOBBY_ROOM: i64 = 0;

/// Sentinel meaning "not in any room".
pub const NO_ROOM: i64 = -1;

#[derive(Clone)]
pub(crate) struct Node {
    pub user_id: i64,
    pub room_id: i64,
    pub prev: Option<usize>,
    pub next: Option<usize>,
    pub member: Arc<dyn Member>,
}

/// Slot arena with a free list. Freed slots are recycled in LIFO order.
#[derive(Default)]
pub(crate) struct Arena {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
}

impl Arena {
    pub fn new() -> Self {
        Arena::default()
    }

    pub fn insert(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    pub fn remove(&mut self, idx: usize) -> Option<Node> {
        let node = self.slots.get_mut(idx)?.take();
        if node.is_some() {
            self.free.push(idx);
        }
        node
    }

    pub fn get(&self, idx: usize) -> Option<&Node> {
        self.slots.get(idx)?.as_ref()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Node> {
        self.slots.get_mut(idx)?.as_mut()
    }
}

/// One broadcast room.
pub struct Room {
    pub id: i64,
    /// Count of linked members. Matches the length of the list from `head`.
    pub online: usize,
    /// Tombstone. A dropped room is unreachable from the bucket's room map
    /// and is replaced, never reused, if the id comes back.
    pub dropped: bool,
    pub(crate) head: Option<usize>,
}

impl Room {
    pub fn new(id: i64) -> Self {
        Room {
            id,
            online: 0,
            dropped: false,
            head: None,
        }
    }

    /// Prepend a member record at the head.
    pub(crate) fn link_front(&mut self, arena: &mut Arena, idx: usize) {
        if let Some(old_head) = self.head {
            if let Some(n) = arena.get_mut(old_head) {
                n.prev = Some(idx);
            }
        }
        if let Some(n) = arena.get_mut(idx) {
            n.prev = None;
            n.next = self.head;
            n.room_id = self.id;
        }
        self.head = Some(idx);
        self.online += 1;
    }

    /// Unlink a member record, fixing up its neighbors and the head.
    pub(crate) fn unlink(&mut self, arena: &mut Arena, idx: usize) {
        let (prev, next) = match arena.get(idx) {
            Some(n) => (n.prev, n.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(n) = arena.get_mut(p) {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        if let Some(nx) = next {
            if let Some(n) = arena.get_mut(nx) {
                n.prev = prev;
            }
        }
        if let Some(n) = arena.get_mut(idx) {
            n.prev = None;
            n.next = None;
            n.room_id = NO_ROOM;
        }
        self.online = self.online.saturating_sub(1);
    }

    /// Deliver `message` to every member, walking from the head.
    ///
    /// Delivery is non-blocking; a member whose queue is full misses this
    /// push. The walk remembers the first member's user id and bails out if
    /// it comes around again, which caps the damage from a cyclic list.
    pub(crate) fn push(&self, arena: &Arena, message: &Bytes) {
        if self.dropped {
            return;
        }
        let mut cursor = self.head;
        let mut first_user: Option<i64> = None;
        let mut delivered = 0usize;
        while let Some(idx) = cursor {
            let node = match arena.get(idx) {
                Some(n) => n,
                None => break,
            };
            match first_user {
                None => first_user = Some(node.user_id),
                Some(first) if first == node.user_id => break,
                _ => {}
            }
            node.member.push(message.clone());
            delivered += 1;
            if delivered > self.online {
                break;
            }
            cursor = node.next;
        }
    }

    /// Member user ids in list order.
    pub(crate) fn member_ids(&self, arena: &Arena) -> Vec<i64> {
        let mut out = Vec::with_capacity(self.online);
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = match arena.get(idx) {
                Some(n) => n,
                None => break,
            };
            out.push(node.user_id);
            if out.len() > self.online {
                break;
            }
            cursor = node.next;
        }
        out
    }
}
