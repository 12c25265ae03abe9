//! `RoutingTable`: the local sorted-ring view, grounded on
//! `RoutingTable.h`/`RoutingTable.cpp`'s `NodeRingWithHood`. One coarse
//! `parking_lot::RwLock` guards the whole ring, matching spec §5's locking
//! discipline (reads common, writes rare, acquired before any
//! component-specific or `RequestTable` lock).

use crate::partner_node::{Phase, PartnerNode};
use federation_core::error::ErrorCode;
use federation_core::{FederationError, Result};
use federation_ring::{NodeId, NodeIdRange};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, trace};

struct Ring {
    this_node: PartnerNode,
    entries: Vec<PartnerNode>,
    by_address: HashMap<SocketAddr, NodeId>,
    pred_hood_edge: usize,
    succ_hood_edge: usize,
    complete_hood_range: bool,
}

impl Ring {
    fn index_of(&self, id: NodeId) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by_key(&id, |p| p.id())
    }
}

pub struct RoutingTableConfig {
    pub hood_size: usize,
    pub capacity: usize,
}

impl Default for RoutingTableConfig {
    fn default() -> Self {
        Self {
            hood_size: 3,
            capacity: 4096,
        }
    }
}

/// The assignment of a sub-arc produced by [`RoutingTable::partition_ranges`]:
/// either a live `Routing` neighbor to forward to, or a "hole" with only a
/// routing hint (spec §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionedRange {
    pub range: NodeIdRange,
    pub target: Option<NodeId>,
    pub routing_hint: NodeId,
}

pub struct RoutingTable {
    inner: RwLock<Ring>,
    config: RoutingTableConfig,
}

impl RoutingTable {
    pub fn new(this_node: PartnerNode, config: RoutingTableConfig) -> Self {
        let id = this_node.id();
        let address = this_node.physical_address;
        let mut by_address = HashMap::new();
        by_address.insert(address, id);
        Self {
            inner: RwLock::new(Ring {
                this_node,
                entries: Vec::new(),
                by_address,
                pred_hood_edge: 0,
                succ_hood_edge: 0,
                complete_hood_range: true,
            }),
            config,
        }
    }

    pub fn this_node_id(&self) -> NodeId {
        self.inner.read().this_node.id()
    }

    pub fn this_node(&self) -> PartnerNode {
        self.inner.read().this_node.clone()
    }

    /// Upserts `partner` by id. A higher `instance_id` always replaces the
    /// prior entry outright (the old incarnation is gone); an equal
    /// `instance_id` may only advance the phase forward, never backward
    /// (spec §4.2).
    pub fn add_or_update(&self, partner: PartnerNode) -> Result<bool> {
        let mut ring = self.inner.write();
        let id = partner.id();
        match ring.index_of(id) {
            Ok(index) => {
                let existing = &ring.entries[index];
                if partner.instance.instance_id > existing.instance.instance_id {
                    debug!(node_id = %id, "replacing partner with newer instance");
                    ring.by_address.remove(&existing.physical_address);
                    ring.by_address.insert(partner.physical_address, id);
                    ring.entries[index] = partner;
                    Ok(true)
                } else if partner.instance.instance_id == existing.instance.instance_id {
                    if !existing.phase.can_advance_to(partner.phase) {
                        trace!(node_id = %id, from = ?existing.phase, to = ?partner.phase, "ignoring backward phase transition");
                        return Ok(false);
                    }
                    let mut updated = partner;
                    updated.last_accessed = Instant::now();
                    ring.entries[index] = updated;
                    Ok(true)
                } else {
                    trace!(node_id = %id, "ignoring stale instance");
                    Ok(false)
                }
            }
            Err(insert_at) => {
                ring.by_address.insert(partner.physical_address, id);
                ring.entries.insert(insert_at, partner);
                self.rebuild_hood_edges(&mut ring);
                Ok(true)
            }
        }
    }

    pub fn touch(&self, id: NodeId) {
        let mut ring = self.inner.write();
        if let Ok(index) = ring.index_of(id) {
            ring.entries[index].touch();
        }
    }

    pub fn lookup(&self, id: NodeId) -> Option<PartnerNode> {
        let ring = self.inner.read();
        ring.index_of(id).ok().map(|i| ring.entries[i].clone())
    }

    pub fn lookup_by_address(&self, address: SocketAddr) -> Option<PartnerNode> {
        let ring = self.inner.read();
        let id = *ring.by_address.get(&address)?;
        ring.index_of(id).ok().map(|i| ring.entries[i].clone())
    }

    /// Every known entry, for callers (routing's next-hop search, the
    /// gossip target list) that need to range over the whole table rather
    /// than just the neighborhood.
    pub fn all_entries(&self) -> Vec<PartnerNode> {
        self.inner.read().entries.clone()
    }

    /// The known node whose id is the closest forward successor of `id` on
    /// the ring (not necessarily `Routing`; callers filter by phase).
    pub fn successor_of(&self, id: NodeId) -> Option<PartnerNode> {
        let ring = self.inner.read();
        if ring.entries.is_empty() {
            return None;
        }
        match ring.index_of(id) {
            Ok(index) => Some(ring.entries[(index + 1) % ring.entries.len()].clone()),
            Err(insert_at) => Some(ring.entries[insert_at % ring.entries.len()].clone()),
        }
    }

    /// The known node whose id is the closest predecessor of `id`.
    pub fn predecessor_of(&self, id: NodeId) -> Option<PartnerNode> {
        let ring = self.inner.read();
        if ring.entries.is_empty() {
            return None;
        }
        match ring.index_of(id) {
            Ok(index) => {
                let len = ring.entries.len();
                Some(ring.entries[(index + len - 1) % len].clone())
            }
            Err(insert_at) => {
                let len = ring.entries.len();
                Some(ring.entries[(insert_at + len - 1) % len].clone())
            }
        }
    }

    /// Entries within the current neighborhood arc, `this_node` excluded.
    pub fn neighborhood(&self) -> Vec<PartnerNode> {
        let ring = self.inner.read();
        if ring.entries.is_empty() {
            return Vec::new();
        }
        if ring.complete_hood_range {
            return ring.entries.clone();
        }
        let len = ring.entries.len();
        let mut result = Vec::new();
        let mut i = ring.pred_hood_edge;
        loop {
            result.push(ring.entries[i].clone());
            if i == ring.succ_hood_edge {
                break;
            }
            i = (i + 1) % len;
        }
        result
    }

    /// Union of `this_node`'s token range with any neighbor's range that is
    /// adjacent to it, used to answer authoritative-range queries (spec
    /// §4.2) without waiting for a full gossip round.
    pub fn combined_neighborhood_token_range(&self) -> NodeIdRange {
        let ring = self.inner.read();
        let mut combined = ring.this_node.token.range();
        for partner in self.neighborhood_locked(&ring) {
            let candidate_range = partner.token.range();
            if combined.is_succ_adjacent_to(&candidate_range) || combined.is_pred_adjacent_to(&candidate_range) {
                if let Some(merged) = NodeIdRange::merge(&combined, &candidate_range) {
                    combined = merged;
                }
            }
        }
        combined
    }

    fn neighborhood_locked(&self, ring: &Ring) -> Vec<PartnerNode> {
        if ring.entries.is_empty() {
            return Vec::new();
        }
        if ring.complete_hood_range {
            return ring.entries.clone();
        }
        let len = ring.entries.len();
        let mut result = Vec::new();
        let mut i = ring.pred_hood_edge;
        loop {
            result.push(ring.entries[i].clone());
            if i == ring.succ_hood_edge {
                break;
            }
            i = (i + 1) % len;
        }
        result
    }

    /// Splits `target_range` into sub-arcs assigned to the numerically
    /// closest known `Routing` node, used by Broadcast and Multicast to
    /// fan out a range-scoped message. A range with no known `Routing`
    /// owner comes back as a single hole carrying its own midpoint as a
    /// routing hint (spec §4.2).
    pub fn partition_ranges(&self, target_range: NodeIdRange) -> Vec<PartitionedRange> {
        let ring = self.inner.read();
        let mut routing_ids: Vec<NodeId> = ring
            .entries
            .iter()
            .filter(|p| p.phase == Phase::Routing)
            .map(|p| p.id())
            .collect();
        if ring.this_node.phase == Phase::Routing {
            routing_ids.push(ring.this_node.id());
        }
        routing_ids.sort();
        routing_ids.dedup();

        let hint = range_hint(target_range);
        if routing_ids.is_empty() {
            return vec![PartitionedRange {
                range: target_range,
                target: None,
                routing_hint: hint,
            }];
        }

        let mut result = Vec::new();
        let len = routing_ids.len();
        for (i, &owner) in routing_ids.iter().enumerate() {
            let prev = routing_ids[(i + len - 1) % len];
            let next = routing_ids[(i + 1) % len];
            let arc_begin = if len == 1 { NodeId::MIN } else { prev.succ_midpoint(owner).succ_walk(1) };
            let arc_end = if len == 1 { NodeId::MAX } else { owner.succ_midpoint(next) };
            let owner_arc = if len == 1 { NodeIdRange::Full } else { NodeIdRange::new(arc_begin, arc_end) };
            for piece in owner_arc.intersect(&target_range) {
                result.push(PartitionedRange {
                    range: piece,
                    target: Some(owner),
                    routing_hint: owner,
                });
            }
        }
        result
    }

    /// Retains only the top-`capacity` entries by
    /// `(is_routing desc, is_shutdown asc, is_unknown asc, last_accessed desc)`
    /// once the table exceeds `RoutingTableCapacity` (spec §4.2). The two
    /// current neighborhood hood edges are never eviction candidates —
    /// `assert_not_removing_edge` is consulted for every entry the ranking
    /// would otherwise drop, so a ranking bug that tried to compact away an
    /// edge node fails loudly instead of silently breaking the hood window.
    pub fn compact(&self) {
        let mut ring = self.inner.write();
        if ring.entries.len() <= self.config.capacity {
            return;
        }
        let complete = ring.complete_hood_range;
        let pred_edge = ring.pred_hood_edge;
        let succ_edge = ring.succ_hood_edge;
        let is_edge = |index: usize| -> bool { !complete && (index == pred_edge || index == succ_edge) };

        let entries: Vec<(usize, PartnerNode)> = ring.entries.drain(..).enumerate().collect();
        let (protected, mut rest): (Vec<_>, Vec<_>) = entries.into_iter().partition(|(index, _)| is_edge(*index));

        rest.sort_by(|(ia, a), (ib, b)| rank_key(a, *ia).cmp(&rank_key(b, *ib)));
        let keep_from_rest = self.config.capacity.saturating_sub(protected.len());
        for (index, _) in rest.iter().skip(keep_from_rest) {
            assert_not_removing_edge(is_edge(*index)).expect("eviction candidates are drawn from the non-edge partition");
        }
        rest.truncate(keep_from_rest);

        let mut kept: Vec<(usize, PartnerNode)> = protected;
        kept.extend(rest);
        kept.sort_by_key(|(_, p)| p.id());

        ring.by_address.clear();
        ring.entries = kept
            .into_iter()
            .map(|(_, p)| {
                ring.by_address.insert(p.physical_address, p.id());
                p
            })
            .collect();
        self.rebuild_hood_edges(&mut ring);
    }

    /// Removes `id` outright, e.g. once a node has confirmed `Shutdown` and
    /// aged past the last round that might still reference it. Asserts
    /// against removing either neighborhood hood edge (spec §4.2) — a
    /// caller that wants an edge node gone should wait for a `Ping` round or
    /// a new admission to shift the edge elsewhere first.
    pub fn remove_node(&self, id: NodeId) -> Result<()> {
        let mut ring = self.inner.write();
        let Ok(index) = ring.index_of(id) else {
            return Ok(());
        };
        let is_edge = !ring.complete_hood_range && (index == ring.pred_hood_edge || index == ring.succ_hood_edge);
        assert_not_removing_edge(is_edge)?;
        let removed = ring.entries.remove(index);
        ring.by_address.remove(&removed.physical_address);
        self.rebuild_hood_edges(&mut ring);
        Ok(())
    }

    fn rebuild_hood_edges(&self, ring: &mut Ring) {
        let len = ring.entries.len();
        if len == 0 {
            ring.pred_hood_edge = 0;
            ring.succ_hood_edge = 0;
            ring.complete_hood_range = true;
            return;
        }
        let this_id = ring.this_node.id();
        let anchor = match ring.index_of(this_id) {
            Ok(i) => i,
            Err(i) => i % len,
        };
        let hood = self.config.hood_size.min(len);
        if hood * 2 >= len {
            ring.complete_hood_range = true;
            ring.pred_hood_edge = anchor % len;
            ring.succ_hood_edge = anchor % len;
            return;
        }
        ring.complete_hood_range = false;
        ring.pred_hood_edge = (anchor + len - hood) % len;
        ring.succ_hood_edge = (anchor + hood) % len;
    }
}

/// `(is_routing desc, is_shutdown asc, is_unknown asc, last_accessed desc)`,
/// encoded so that a smaller tuple sorts first via the derived `Ord`.
fn rank_key(p: &PartnerNode, _index: usize) -> (std::cmp::Reverse<bool>, bool, bool, std::cmp::Reverse<Instant>) {
    let is_routing = p.phase == Phase::Routing;
    let is_shutdown = p.phase == Phase::Shutdown;
    let is_unknown = p.phase == Phase::Booting;
    (
        std::cmp::Reverse(is_routing),
        is_shutdown,
        is_unknown,
        std::cmp::Reverse(p.last_accessed),
    )
}

fn range_hint(range: NodeIdRange) -> NodeId {
    match range {
        NodeIdRange::Arc { begin, end } => begin.succ_midpoint(end),
        NodeIdRange::Full => NodeId::MIN.succ_midpoint(NodeId::MAX),
        NodeIdRange::Empty => NodeId::MIN,
    }
}

pub fn assert_not_removing_edge(is_edge: bool) -> Result<()> {
    if is_edge {
        Err(FederationError::new(
            ErrorCode::InvalidArgument,
            "cannot remove a node currently acting as a neighborhood hood edge",
        ))
    } else {
        Ok(())
    }
}
