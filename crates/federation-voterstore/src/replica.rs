//! Replica-set membership and the per-replica phase state machine (spec
//! §4.7). Grounded on `original_source/.../VoterStore.h`'s
//! `VoterStoreRequestAsyncOperation` primary-resolution flow and the
//! replica roles implied by its bootstrap/catch-up operations.

use federation_ring::NodeInstance;
use std::time::Instant;

/// `Uninitialized` is the replica's state before it has even attempted to
/// locate a generation to join; every other phase is entered only after a
/// generation has been determined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaPhase {
    Uninitialized,
    /// No usable replica-set information; waiting for a bootstrap or
    /// catch-up message to arrive.
    None,
    /// The locally held replica-set view has been superseded (a higher
    /// generation or epoch was observed) and must be discarded.
    Invalid,
    /// Racing with other voters to become the bootstrap primary of a new
    /// generation.
    Introduce,
    /// Copying store state from a primary that has accepted us into its
    /// replica set.
    Bootstrap,
    /// Caught up and acknowledging writes as a secondary, but not yet
    /// promoted past the primary's own bookkeeping.
    BecomeSecondary,
    Secondary,
    /// Won an election or failover and is adopting the highest sequence
    /// seen from surviving replicas before serving writes.
    BecomePrimary,
    Primary,
}

impl ReplicaPhase {
    pub fn can_serve_reads(self) -> bool {
        matches!(self, ReplicaPhase::Primary)
    }

    pub fn can_accept_writes(self) -> bool {
        matches!(self, ReplicaPhase::Primary)
    }

    /// Whether a transition from `self` to `next` is a legal step of the
    /// state machine. Bootstrap fast paths (a solo primary, or a
    /// copy-then-catch-up collapse) call the setter directly instead of
    /// stepping through every intermediate phase; this guards the
    /// steady-state transitions everything else goes through.
    pub fn can_advance_to(self, next: Self) -> bool {
        use ReplicaPhase::*;
        matches!(
            (self, next),
            (Uninitialized, None)
                | (Uninitialized, Introduce)
                | (None, Introduce)
                | (None, Bootstrap)
                | (Introduce, Bootstrap)
                | (Introduce, Invalid)
                | (Bootstrap, BecomeSecondary)
                | (Bootstrap, Invalid)
                | (BecomeSecondary, Secondary)
                | (BecomeSecondary, Invalid)
                | (Secondary, BecomePrimary)
                | (Secondary, Invalid)
                | (Secondary, None)
                | (BecomePrimary, Primary)
                | (BecomePrimary, Invalid)
                | (Primary, Invalid)
                | (Primary, None)
                | (Invalid, None)
                | (Invalid, Introduce)
        )
    }
}

/// One member of a replica set, as tracked by the primary.
#[derive(Clone, Debug)]
pub struct Replica {
    pub instance: NodeInstance,
    pub is_down: bool,
    /// The highest global write-log sequence this replica is known to have
    /// caught up to; used both for catch-up gap detection and, during
    /// failover, for adopting the most advanced surviving view.
    pub sequence: i64,
    pub last_contact: Instant,
}

impl Replica {
    pub fn new(instance: NodeInstance, now: Instant) -> Self {
        Self {
            instance,
            is_down: false,
            sequence: 0,
            last_contact: now,
        }
    }
}

/// The configuration of a voter store: which nodes form the replica set,
/// at which generation and epoch.
///
/// `generation` identifies which bootstrap race produced this set;
/// `epoch` increases on every primary failover within a generation so that
/// replies and catch-up requests can be rejected as stale purely by
/// comparing the pair.
#[derive(Clone, Debug)]
pub struct ReplicaSet {
    pub generation: u64,
    pub epoch: u64,
    /// `replicas[0]` is always the current primary; `replicas[1..]` are
    /// secondaries in the order they were admitted.
    pub replicas: Vec<Replica>,
}

impl ReplicaSet {
    pub fn primary(&self) -> Option<&Replica> {
        self.replicas.first()
    }

    pub fn secondaries(&self) -> &[Replica] {
        if self.replicas.is_empty() {
            &[]
        } else {
            &self.replicas[1..]
        }
    }

    pub fn live_secondary_count(&self) -> usize {
        self.secondaries().iter().filter(|r| !r.is_down).count()
    }

    pub fn is_stale_against(&self, other_generation: u64, other_epoch: u64) -> bool {
        (other_generation, other_epoch) > (self.generation, self.epoch)
    }

    pub fn find_mut(&mut self, instance: NodeInstance) -> Option<&mut Replica> {
        self.replicas.iter_mut().find(|r| r.instance.is_same_node(instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federation_ring::NodeId;

    fn instance(v: u128) -> NodeInstance {
        NodeInstance::new(NodeId::new(v), 1)
    }

    #[test]
    fn steady_state_transitions_are_legal_in_order() {
        use ReplicaPhase::*;
        let path = [
            Uninitialized,
            Introduce,
            Bootstrap,
            BecomeSecondary,
            Secondary,
            BecomePrimary,
            Primary,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn skipping_a_phase_is_illegal() {
        assert!(!ReplicaPhase::Bootstrap.can_advance_to(ReplicaPhase::Primary));
        assert!(!ReplicaPhase::Uninitialized.can_advance_to(ReplicaPhase::Primary));
    }

    #[test]
    fn secondaries_excludes_the_primary_slot() {
        let now = Instant::now();
        let set = ReplicaSet {
            generation: 1,
            epoch: 1,
            replicas: vec![Replica::new(instance(1), now), Replica::new(instance(2), now)],
        };
        assert_eq!(set.primary().unwrap().instance, instance(1));
        assert_eq!(set.secondaries().len(), 1);
        assert_eq!(set.live_secondary_count(), 1);
    }

    #[test]
    fn higher_generation_or_epoch_is_stale_against() {
        let set = ReplicaSet {
            generation: 2,
            epoch: 3,
            replicas: Vec::new(),
        };
        assert!(set.is_stale_against(2, 4));
        assert!(set.is_stale_against(3, 0));
        assert!(!set.is_stale_against(2, 3));
        assert!(!set.is_stale_against(1, 100));
    }
}
