//! Process-wide correlation id generator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

fn counter() -> &'static AtomicU64 {
    static NEXT: OnceLock<AtomicU64> = OnceLock::new();
    NEXT.get_or_init(|| {
        // Seed from the clock so ids from successive process runs do not
        // collide with stale in-flight traffic.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        AtomicU64::new(seed | 1)
    })
}

/// The next correlation id. Monotonic within a process, never zero.
pub fn next_id() -> u64 {
    loop {
        let id = counter().fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = next_id();
        let b = next_id();
        let c = next_id();
        assert!(a < b && b < c);
        assert_ne!(a, 0);
    }
}
