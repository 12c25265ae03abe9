//! Next-hop selection (spec §4.8 step 2): the greedy ring-routing choice
//! every hop makes independently from its own `RoutingTable`. Grounded on
//! `RoutingTable.cpp`'s neighbor-distance comparison that
//! `federation-table::table::rank_key` already models for compaction; this
//! is the same shape of tie-break applied to hop selection instead.

use federation_ring::NodeId;
use federation_table::{Phase, PartnerNode};

/// Picks the known, available partner whose id is numerically closest to
/// `target_id`, breaking ties by higher phase (`Routing` over `Inserting`)
/// and then by more recently observed liveness.
pub fn select_next_hop(candidates: &[PartnerNode], target_id: NodeId) -> Option<PartnerNode> {
    candidates
        .iter()
        .filter(|p| p.phase.is_available())
        .min_by(|a, b| {
            a.id()
                .min_dist(target_id)
                .cmp(&b.id().min_dist(target_id))
                .then_with(|| b.phase.cmp(&a.phase))
                .then_with(|| b.last_accessed.cmp(&a.last_accessed))
        })
        .cloned()
}

/// Whether `id` falls within `this_range`, i.e. this node should deliver
/// locally rather than forward (spec §4.8 step 1).
pub fn is_local_delivery(this_range: federation_ring::NodeIdRange, id: NodeId) -> bool {
    this_range.contains(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use federation_ring::{NodeId, NodeInstance};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::{Duration, Instant};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn partner(id: u128, phase: Phase) -> PartnerNode {
        let mut p = PartnerNode::new(NodeInstance::new(NodeId::new(id), 1), addr(9000 + id as u16), "ring0");
        p.phase = phase;
        p
    }

    #[test]
    fn picks_the_closest_available_candidate() {
        let candidates = vec![partner(10, Phase::Routing), partner(90, Phase::Routing), partner(50, Phase::Routing)];
        let picked = select_next_hop(&candidates, NodeId::new(55)).unwrap();
        assert_eq!(picked.id(), NodeId::new(50));
    }

    #[test]
    fn excludes_unavailable_phases() {
        let candidates = vec![partner(50, Phase::Booting), partner(90, Phase::Routing)];
        let picked = select_next_hop(&candidates, NodeId::new(55)).unwrap();
        assert_eq!(picked.id(), NodeId::new(90));
    }

    #[test]
    fn ties_prefer_higher_phase_then_more_recent_contact() {
        let mut older_routing = partner(40, Phase::Routing);
        older_routing.last_accessed = Instant::now() - Duration::from_secs(60);
        let inserting = partner(60, Phase::Inserting);
        let candidates = vec![older_routing.clone(), inserting];
        // both are distance 10 from 50: 40 and 60.
        let picked = select_next_hop(&candidates, NodeId::new(50)).unwrap();
        assert_eq!(picked.phase, Phase::Routing);

        let mut fresher_routing = partner(40, Phase::Routing);
        fresher_routing.last_accessed = Instant::now();
        let candidates = vec![older_routing, fresher_routing.clone()];
        let picked = select_next_hop(&candidates, NodeId::new(40)).unwrap();
        assert_eq!(picked.last_accessed, fresher_routing.last_accessed);
    }

    #[test]
    fn empty_candidate_list_yields_no_hop() {
        assert!(select_next_hop(&[], NodeId::new(1)).is_none());
    }
}
