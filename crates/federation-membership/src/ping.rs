//! Neighborhood liveness probing and unknown-node discovery (spec §4.5).
//! Grounded on `original_source/.../PingManager*`.

use federation_core::time::Clock;
use federation_ring::{NodeId, NodeIdRange, NodeInstance};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Sent to the two hood edges and the immediate pred/succ.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PingRequestBody {
    pub sender_instance: NodeInstance,
    pub sender_hood_range: NodeIdRange,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PingReplyBody {
    pub receiver_range: NodeIdRange,
    pub partner_ids: Vec<NodeId>,
}

/// Tracks partners observed only through a `PingReply`, not yet confirmed
/// `Routing`, and ages them out if they never answer a direct probe.
pub struct UnknownNodeTracker {
    clock: Arc<dyn Clock>,
    probe_timeout: Duration,
    first_seen: parking_lot::Mutex<HashMap<NodeId, std::time::Instant>>,
}

impl UnknownNodeTracker {
    pub fn new(clock: Arc<dyn Clock>, probe_timeout: Duration) -> Self {
        Self {
            clock,
            probe_timeout,
            first_seen: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Records `id` as unknown if it's the first time we've heard of it.
    /// Returns `true` the first time (the caller should attempt a direct
    /// probe), `false` on a repeat sighting.
    pub fn observe(&self, id: NodeId) -> bool {
        let mut seen = self.first_seen.lock();
        if seen.contains_key(&id) {
            false
        } else {
            seen.insert(id, self.clock.instant_now());
            true
        }
    }

    /// Clears `id` once it has answered a direct probe and been elevated
    /// to `Routing` in the routing table.
    pub fn elevate(&self, id: NodeId) {
        self.first_seen.lock().remove(&id);
    }

    /// Returns every id whose probe window has elapsed without answering,
    /// removing them from tracking — the caller ages these out of the
    /// routing table.
    pub fn sweep_expired(&self) -> Vec<NodeId> {
        let now = self.clock.instant_now();
        let mut seen = self.first_seen.lock();
        let expired: Vec<NodeId> = seen
            .iter()
            .filter(|(_, first_seen)| now.duration_since(**first_seen) >= self.probe_timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            seen.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federation_core::time::FakeClock;

    #[test]
    fn first_sighting_triggers_a_probe_repeats_do_not() {
        let clock = Arc::new(FakeClock::new());
        let tracker = UnknownNodeTracker::new(clock, Duration::from_secs(5));
        assert!(tracker.observe(NodeId::new(1)));
        assert!(!tracker.observe(NodeId::new(1)));
    }

    #[test]
    fn elevate_removes_from_tracking() {
        let clock = Arc::new(FakeClock::new());
        let tracker = UnknownNodeTracker::new(clock, Duration::from_secs(5));
        tracker.observe(NodeId::new(1));
        tracker.elevate(NodeId::new(1));
        assert!(tracker.observe(NodeId::new(1)));
    }

    #[test]
    fn unanswered_probe_ages_out_after_timeout() {
        let clock = Arc::new(FakeClock::new());
        let tracker = UnknownNodeTracker::new(clock.clone(), Duration::from_secs(5));
        tracker.observe(NodeId::new(1));
        clock.advance(Duration::from_secs(6));
        let expired = tracker.sweep_expired();
        assert_eq!(expired, vec![NodeId::new(1)]);
        assert!(tracker.observe(NodeId::new(1)));
    }
}
