//! `UpdateManager` (spec §4.11): periodic gossip beyond the immediate
//! neighborhood, alternating an exponentially-spaced target list with a
//! gap-filling target chosen from ring ranges no reply has recently
//! covered. Grounded on `original_source/.../UpdateManager.cpp`.

use federation_ring::{NodeId, NodeIdRange};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// One row of the exponentially-spaced target list: `self`, then
/// `self + 2^127`, `self - 2^127`, `self + 2^126`, ... (spec §4.11).
pub fn exponential_targets(self_id: NodeId, max_update_target: u32) -> Vec<NodeId> {
    let cap = max_update_target.max(1) as usize;
    let mut targets = vec![self_id];
    let mut shift: i32 = 127;
    while targets.len() < cap && shift >= 0 {
        let dist: u128 = 1u128 << shift;
        targets.push(self_id.succ_walk(dist));
        if targets.len() >= cap {
            break;
        }
        targets.push(self_id.pred_walk(dist));
        shift -= 1;
    }
    targets.truncate(cap);
    targets
}

/// A node-addressed, range-carrying gossip request (spec §4.11).
#[derive(Clone, Copy, Debug)]
pub struct UpdateRequest {
    pub request_time: Instant,
    pub is_exponential_target: bool,
    pub range: NodeIdRange,
}

/// The matching reply: the global-time lease piggybacks here (spec §4.12
/// notes the exchange rides on every routed reply; `UpdateManager`'s own
/// reply is one such carrier), plus the range the receiver actually knows
/// about and whether this reply answers an exponential-target request.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct UpdateReply {
    pub global_lease_epoch: u64,
    pub update_range: NodeIdRange,
    pub is_to_exponential_target: bool,
}

fn range_midpoint(range: NodeIdRange) -> NodeId {
    match range {
        NodeIdRange::Arc { begin, end } => begin.succ_midpoint(end),
        NodeIdRange::Full | NodeIdRange::Empty => NodeId::MIN,
    }
}

/// Tracks which sub-arcs haven't been refreshed by a recent `UpdateReply`,
/// and drives the alternation between exponential targets and gap-filling.
pub struct UpdateManager {
    self_id: NodeId,
    exponential: Vec<NodeId>,
    next_exponential: AtomicUsize,
    next_is_gap_filling: std::sync::atomic::AtomicBool,
    gaps: Mutex<Vec<NodeIdRange>>,
}

impl UpdateManager {
    pub fn new(self_id: NodeId, max_update_target: u32) -> Self {
        Self {
            self_id,
            exponential: exponential_targets(self_id, max_update_target),
            next_exponential: AtomicUsize::new(0),
            next_is_gap_filling: std::sync::atomic::AtomicBool::new(false),
            gaps: Mutex::new(vec![NodeIdRange::Full]),
        }
    }

    /// Picks the next target for this round, alternating exponential and
    /// gap-filling picks. Returns `None` only when there is genuinely
    /// nothing to gossip to (no exponential targets configured and no
    /// outstanding gaps).
    pub fn next_target(&self) -> Option<(NodeId, bool)> {
        let use_gap = self.next_is_gap_filling.fetch_xor(true, Ordering::Relaxed);
        if use_gap {
            if let Some(target) = self.gap_target() {
                return Some((target, false));
            }
        }
        if self.exponential.is_empty() {
            return self.gap_target().map(|t| (t, false));
        }
        let index = self.next_exponential.fetch_add(1, Ordering::Relaxed) % self.exponential.len();
        Some((self.exponential[index], true))
    }

    fn gap_target(&self) -> Option<NodeId> {
        let gaps = self.gaps.lock();
        gaps.first().map(|&range| range_midpoint(range))
    }

    /// The range to advertise in an outbound `UpdateRequest`: the union of
    /// what's still an outstanding gap, capped to a single representative
    /// arc (the original sends the requester's own neighborhood range here
    /// too; this crate's scope is ring-wide gap coverage only).
    pub fn outstanding_gap(&self) -> Option<NodeIdRange> {
        self.gaps.lock().first().copied()
    }

    /// Folds a reply's covered range into the gap set, shrinking or
    /// removing whichever gaps it overlaps. Once every gap has closed, the
    /// set resets to `Full` — a fresh round begins recomputing staleness.
    pub fn integrate_reply(&self, reply: &UpdateReply) {
        let mut gaps = self.gaps.lock();
        let remaining: Vec<NodeIdRange> = gaps.iter().flat_map(|g| g.subtract_many(&[reply.update_range])).filter(|r| !r.is_empty()).collect();
        *gaps = if remaining.is_empty() { vec![NodeIdRange::Full] } else { remaining };
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_targets_starts_with_self_and_alternates_direction() {
        let targets = exponential_targets(NodeId::new(1_000_000), 5);
        assert_eq!(targets.len(), 5);
        assert_eq!(targets[0], NodeId::new(1_000_000));
        assert_ne!(targets[1], targets[2]);
    }

    #[test]
    fn respects_max_update_target_cap() {
        let targets = exponential_targets(NodeId::new(5), 1);
        assert_eq!(targets, vec![NodeId::new(5)]);
    }

    #[test]
    fn initial_gap_is_the_whole_ring() {
        let mgr = UpdateManager::new(NodeId::new(1), 4);
        assert_eq!(mgr.outstanding_gap(), Some(NodeIdRange::Full));
    }

    #[test]
    fn integrating_a_reply_that_covers_everything_resets_the_gap_to_full() {
        let mgr = UpdateManager::new(NodeId::new(1), 4);
        mgr.integrate_reply(&UpdateReply {
            global_lease_epoch: 1,
            update_range: NodeIdRange::Full,
            is_to_exponential_target: false,
        });
        assert_eq!(mgr.outstanding_gap(), Some(NodeIdRange::Full));
    }

    #[test]
    fn integrating_a_partial_reply_shrinks_the_gap() {
        let mgr = UpdateManager::new(NodeId::new(1), 4);
        let covered = NodeIdRange::new(NodeId::new(0), NodeId::new(u128::MAX / 2));
        mgr.integrate_reply(&UpdateReply {
            global_lease_epoch: 1,
            update_range: covered,
            is_to_exponential_target: false,
        });
        let remaining = mgr.outstanding_gap().unwrap();
        assert_ne!(remaining, NodeIdRange::Full);
        assert!(!remaining.is_empty());
    }

    #[test]
    fn next_target_alternates_between_exponential_and_gap_filling() {
        let mgr = UpdateManager::new(NodeId::new(1), 4);
        let (_, first_is_exponential) = mgr.next_target().unwrap();
        let (_, second_is_exponential) = mgr.next_target().unwrap();
        assert!(first_is_exponential);
        assert!(!second_is_exponential);
    }
}
