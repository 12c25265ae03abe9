//! Bootstrap-race helpers: which of several simultaneously-introducing
//! voters becomes the primary of a new generation (spec §4.7, "Bootstrap
//! race"). Grounded on `original_source/.../VoterStore.cpp`'s handling of
//! concurrent `Introduce` requests racing for the same generation.

use federation_ring::NodeId;

/// A voter accepts a bootstrap request for a new generation only if it has
/// not already committed to a different candidate, or if the requester's
/// id is numerically smaller than the one it already accepted — the same
/// smallest-id tie-break `Routing`'s seed selection uses, so every voter
/// converges on the same winner without a separate coordination round.
pub fn accepts_bootstrap_request(already_accepted: Option<NodeId>, requester: NodeId) -> bool {
    match already_accepted {
        None => true,
        Some(accepted) => requester < accepted,
    }
}

/// Resolves the bootstrap race's tick-based election: the candidate with
/// the highest `leader_instance` tick wins; ties break on the smaller node
/// id for determinism. Returns `None` for an empty ballot.
///
/// *Open Question decision*: the spec leaves the tie-break for equal ticks
/// unspecified. This crate treats a tie as impossible in practice (ticks
/// are drawn from each candidate's local clock at the moment it starts
/// introducing) but still breaks it deterministically by node id so the
/// function is total.
pub fn elect_leader(candidates: &[(NodeId, u64)]) -> Option<NodeId> {
    candidates
        .iter()
        .max_by_key(|(id, tick)| (*tick, std::cmp::Reverse(*id)))
        .map(|(id, _)| *id)
}

/// The generation a winning bootstrap candidate adopts for the new replica
/// set.
///
/// *Open Question decision*: the spec says the new generation is derived
/// from the winning `leader_instance` tick but doesn't say how it
/// interacts with a generation this voter already held (e.g. after a
/// partition heals and a stale voter rejoins). This crate takes the
/// larger of the two so a generation number is never reused: a fresh
/// cluster's first tick may be smaller than a generation number a
/// long-lived voter already advanced past.
pub fn next_generation(leader_instance_tick: u64, previously_held_generation: u64) -> u64 {
    leader_instance_tick.max(previously_held_generation + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(v: u128) -> NodeId {
        NodeId::new(v)
    }

    #[test]
    fn first_candidate_is_always_accepted() {
        assert!(accepts_bootstrap_request(None, id(5)));
    }

    #[test]
    fn smaller_id_displaces_an_already_accepted_candidate() {
        assert!(accepts_bootstrap_request(Some(id(10)), id(5)));
        assert!(!accepts_bootstrap_request(Some(id(5)), id(10)));
    }

    #[test]
    fn elect_leader_picks_highest_tick() {
        let candidates = [(id(1), 10), (id(2), 20), (id(3), 15)];
        assert_eq!(elect_leader(&candidates), Some(id(2)));
    }

    #[test]
    fn elect_leader_breaks_ties_by_smaller_id() {
        let candidates = [(id(9), 10), (id(2), 10)];
        assert_eq!(elect_leader(&candidates), Some(id(2)));
    }

    #[test]
    fn elect_leader_of_empty_ballot_is_none() {
        assert_eq!(elect_leader(&[]), None);
    }

    #[test]
    fn next_generation_never_goes_backward() {
        assert_eq!(next_generation(3, 100), 101);
        assert_eq!(next_generation(500, 100), 500);
    }
}
