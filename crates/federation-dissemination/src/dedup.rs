//! `ExpiringSet<broadcast_id>`: duplicate suppression with a fixed TTL,
//! grounded on `BroadcastManager.cpp`'s seen-id table that age out
//! (`BroadcastContextKeepDuration`).

use federation_core::time::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct ExpiringSet {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    seen: parking_lot::Mutex<HashMap<u64, Instant>>,
}

impl ExpiringSet {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            seen: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` the first time `id` is observed (the caller should
    /// act on it); `false` on a repeat within the TTL window. Also sweeps
    /// expired entries so the set doesn't grow without bound.
    pub fn insert_if_absent(&self, id: u64) -> bool {
        let now = self.clock.instant_now();
        let mut seen = self.seen.lock();
        seen.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);
        if seen.contains_key(&id) {
            false
        } else {
            seen.insert(id, now);
            true
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federation_core::time::FakeClock;

    #[test]
    fn first_sighting_is_new_repeats_are_not() {
        let clock = Arc::new(FakeClock::new());
        let set = ExpiringSet::new(clock, Duration::from_secs(30));
        assert!(set.insert_if_absent(1));
        assert!(!set.insert_if_absent(1));
    }

    #[test]
    fn expired_entries_are_forgotten() {
        let clock = Arc::new(FakeClock::new());
        let set = ExpiringSet::new(clock.clone(), Duration::from_secs(10));
        set.insert_if_absent(1);
        clock.advance(Duration::from_secs(11));
        assert!(set.insert_if_absent(1));
    }
}
