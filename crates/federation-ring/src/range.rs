//! `NodeIdRange`: a half-open arc of the ring, grounded on
//! `NodeIdRange.h`/`NodeIdRange.cpp`. The original represents `Empty` and
//! `Full` as concrete sentinel `(begin, end)` pairs chosen so the generic
//! distance arithmetic happens to produce the right answer; this port makes
//! both an explicit enum variant instead; spec §3 already calls both
//! "distinguished sentinels", which an enum expresses more directly than a
//! pair of magic values.

use crate::node_id::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeIdRange {
    /// No points.
    Empty,
    /// Every point.
    Full,
    /// The inclusive arc from `begin` to `end`, walking forward. Never
    /// constructed directly with a `begin`/`end` pair whose gap collapses to
    /// the full ring; use [`NodeIdRange::new`], which normalizes that case.
    Arc { begin: NodeId, end: NodeId },
}

impl NodeIdRange {
    /// Constructs an arc, normalizing the degenerate case where `begin` is
    /// exactly one step past `end` (spec §3: "a range of size exactly 2 is
    /// represented as Full") into `Full`, mirroring the original
    /// constructor's own normalization.
    pub fn new(begin: NodeId, end: NodeId) -> NodeIdRange {
        if end.succ_dist(begin) == 1 {
            NodeIdRange::Full
        } else {
            NodeIdRange::Arc { begin, end }
        }
    }

    pub const fn is_empty(&self) -> bool {
        matches!(self, NodeIdRange::Empty)
    }

    pub const fn is_full(&self) -> bool {
        matches!(self, NodeIdRange::Full)
    }

    fn as_arc(&self) -> Option<(NodeId, NodeId)> {
        match self {
            NodeIdRange::Arc { begin, end } => Some((*begin, *end)),
            _ => None,
        }
    }

    /// Size in ring-steps (number of points minus one); `None` for `Empty`
    /// and `Full`, which have no fixed boundary to measure from.
    fn arc_size(begin: NodeId, end: NodeId) -> u128 {
        begin.succ_dist(end)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        match self {
            NodeIdRange::Full => true,
            NodeIdRange::Empty => false,
            NodeIdRange::Arc { begin, end } => begin.succ_dist(id) <= Self::arc_size(*begin, *end),
        }
    }

    /// Whether `self` fully contains `other`. An empty `other` is
    /// vacuously contained in anything.
    pub fn contains_range(&self, other: &NodeIdRange) -> bool {
        if other.is_empty() {
            return true;
        }
        match self {
            NodeIdRange::Full => true,
            NodeIdRange::Empty => false,
            NodeIdRange::Arc { begin, end } => {
                if other.is_full() {
                    return false;
                }
                let (ob, oe) = other.as_arc().expect("non-empty, non-full range is an Arc");
                let size = Self::arc_size(*begin, *end);
                let dist1 = begin.succ_dist(ob);
                if dist1 > size {
                    return false;
                }
                let dist2 = begin.succ_dist(oe);
                dist2 <= size && dist2 >= dist1
            }
        }
    }

    /// Like [`contains`](Self::contains), but a boundary point does not
    /// count — only a strictly interior point does. `Full` has no boundary,
    /// so every point is a proper interior point.
    pub fn proper_contains(&self, id: NodeId) -> bool {
        match self {
            NodeIdRange::Full => true,
            NodeIdRange::Empty => false,
            NodeIdRange::Arc { begin, end } => self.contains(id) && id != *begin && id != *end,
        }
    }

    /// Two non-empty ranges share no points. An empty range is disjoint
    /// from everything, including itself.
    pub fn disjoint(&self, other: &NodeIdRange) -> bool {
        if self.is_empty() || other.is_empty() {
            return true;
        }
        if self.is_full() || other.is_full() {
            return false;
        }
        let (begin, end) = self.as_arc().unwrap();
        let (ob, oe) = other.as_arc().unwrap();
        let size = Self::arc_size(begin, end);
        let dist1 = begin.succ_dist(ob);
        if dist1 <= size {
            return false;
        }
        let dist2 = begin.succ_dist(oe);
        dist2 > size && dist2 >= dist1
    }

    /// Neither of `other`'s boundary points lies in `self`'s proper
    /// interior.
    pub fn proper_disjoint(&self, other: &NodeIdRange) -> bool {
        match other {
            NodeIdRange::Full | NodeIdRange::Empty => self.disjoint(other),
            NodeIdRange::Arc { begin, end } => {
                !self.proper_contains(*begin) && !self.proper_contains(*end)
            }
        }
    }

    fn is_succ_adjacent(&self, other: &NodeIdRange) -> bool {
        match (self.as_arc(), other.as_arc()) {
            (Some((_, end)), Some((ob, _))) => end.succ_dist(ob) == 1,
            _ => false,
        }
    }

    fn is_pred_adjacent(&self, other: &NodeIdRange) -> bool {
        match (self.as_arc(), other.as_arc()) {
            (Some((begin, _)), Some((_, oe))) => oe.succ_dist(begin) == 1,
            _ => false,
        }
    }

    /// Whether `other` extends `self` exactly one step past its successor
    /// boundary (spec §4.1, `RoutingToken::accept`'s successor-side case).
    pub fn is_succ_adjacent_to(&self, other: &NodeIdRange) -> bool {
        self.is_succ_adjacent(other)
    }

    /// Whether `other` extends `self` exactly one step past its predecessor
    /// boundary.
    pub fn is_pred_adjacent_to(&self, other: &NodeIdRange) -> bool {
        self.is_pred_adjacent(other)
    }

    /// Merges two adjacent or overlapping ranges into their union.
    /// Returns `None` if the two ranges are disjoint and not adjacent — the
    /// caller (`RoutingToken::accept`) must treat that as a rejected merge,
    /// not a panic, since it can legitimately happen on a stale gossip
    /// message.
    pub fn merge(a: &NodeIdRange, b: &NodeIdRange) -> Option<NodeIdRange> {
        if a.is_empty() {
            return Some(*b);
        }
        if b.is_empty() {
            return Some(*a);
        }
        if a.disjoint(b) && !(a.is_succ_adjacent(b) || a.is_pred_adjacent(b)) {
            return None;
        }
        if a.contains_range(b) {
            return Some(*a);
        }
        if b.contains_range(a) {
            return Some(*b);
        }
        let (ab, _ae) = a.as_arc().unwrap();
        let (bb, be) = b.as_arc().unwrap();
        if a.contains(bb) || a.is_succ_adjacent(b) {
            return Some(if a.contains(be) {
                NodeIdRange::Full
            } else {
                NodeIdRange::new(ab, be)
            });
        }
        Some(NodeIdRange::new(bb, a.as_arc().unwrap().1))
    }

    /// Splits `self` into what remains after removing every point in
    /// `exclude`, returning up to two disjoint arcs (spec §3: "yields 0, 1,
    /// or 2 arcs"). The second slot is `Empty` when only one arc remains.
    pub fn subtract(&self, exclude: &NodeIdRange) -> (NodeIdRange, NodeIdRange) {
        if self.is_empty() || exclude.contains_range(self) {
            return (NodeIdRange::Empty, NodeIdRange::Empty);
        }
        if exclude.is_empty() || self.disjoint(exclude) {
            return (*self, NodeIdRange::Empty);
        }
        if self.is_full() {
            // `exclude` here is a proper, non-empty, non-full Arc (Full or
            // Empty would already have matched a branch above). The
            // complement of one arc inside the full ring is always exactly
            // one arc.
            let (eb, ee) = exclude.as_arc().unwrap();
            return (NodeIdRange::new(ee.succ_walk(1), eb.pred_walk(1)), NodeIdRange::Empty);
        }
        let (begin, end) = self.as_arc().unwrap();
        let (eb, ee) = exclude.as_arc().unwrap();
        if exclude.contains(begin) {
            let new_end = if exclude.contains(end) {
                eb.pred_walk(1)
            } else {
                end
            };
            (NodeIdRange::new(ee.succ_walk(1), new_end), NodeIdRange::Empty)
        } else {
            let first = NodeIdRange::new(begin, eb.pred_walk(1));
            let second = if !exclude.contains(end) {
                NodeIdRange::new(ee.succ_walk(1), end)
            } else {
                NodeIdRange::Empty
            };
            (first, second)
        }
    }

    /// Points present in both `self` and `other`, expressed as 0, 1, or 2
    /// disjoint arcs. Built on top of [`subtract`](Self::subtract): the
    /// intersection of `self` with `other` is what's left after removing
    /// `other`'s complement from `self`.
    pub fn intersect(&self, other: &NodeIdRange) -> Vec<NodeIdRange> {
        if self.is_empty() || other.is_empty() {
            return Vec::new();
        }
        if self.is_full() {
            return vec![*other];
        }
        if other.is_full() {
            return vec![*self];
        }
        let (complement, _) = NodeIdRange::Full.subtract(other);
        let (first, second) = self.subtract(&complement);
        let mut result = Vec::new();
        if !first.is_empty() {
            result.push(first);
        }
        if !second.is_empty() {
            result.push(second);
        }
        result
    }

    /// Subtracts a whole list of excluded ranges, the way
    /// `RoutingTable::partition_ranges` removes every already-assigned
    /// sub-arc from the remaining "holes" one neighbor at a time.
    pub fn subtract_many(&self, excludes: &[NodeIdRange]) -> Vec<NodeIdRange> {
        let mut result = vec![*self];
        for exclude in excludes {
            let mut next = Vec::with_capacity(result.len());
            for candidate in result {
                let (first, second) = candidate.subtract(exclude);
                if !first.is_empty() {
                    next.push(first);
                }
                if !second.is_empty() {
                    next.push(second);
                }
            }
            result = next;
        }
        result
    }
}

impl fmt::Debug for NodeIdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeIdRange::Empty => write!(f, "empty"),
            NodeIdRange::Full => write!(f, "full"),
            NodeIdRange::Arc { begin, end } => write!(f, "{begin}-{end}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(v: u128) -> NodeId {
        NodeId::new(v)
    }

    #[test]
    fn wrap_around_range_contains_both_endpoints_and_nothing_else() {
        let range = NodeIdRange::new(id(u128::MAX), id(0));
        assert!(range.contains(id(u128::MAX)));
        assert!(range.contains(id(0)));
        assert!(!range.contains(id(1)));
        assert!(!range.contains(id(u128::MAX - 1)));
    }

    #[test]
    fn empty_and_full_are_distinguishable_and_not_equal() {
        assert_ne!(NodeIdRange::Empty, NodeIdRange::Full);
        assert!(NodeIdRange::Empty.is_empty());
        assert!(NodeIdRange::Full.is_full());
        assert!(!NodeIdRange::Empty.is_full());
        assert!(!NodeIdRange::Full.is_empty());
    }

    #[test]
    fn adjacent_pair_normalizes_to_full() {
        // begin = end + 1 means the "gap" collapses and the arc covers everything.
        let range = NodeIdRange::new(id(1), id(0));
        assert!(range.is_full());
    }

    #[test]
    fn subtract_empty_is_identity() {
        let range = NodeIdRange::new(id(0), id(100));
        let (first, second) = range.subtract(&NodeIdRange::Empty);
        assert_eq!(first, range);
        assert!(second.is_empty());
    }

    #[test]
    fn subtract_full_is_empty() {
        let range = NodeIdRange::new(id(0), id(100));
        let (first, second) = range.subtract(&NodeIdRange::Full);
        assert!(first.is_empty());
        assert!(second.is_empty());
    }

    #[test]
    fn subtract_middle_splits_into_two_arcs() {
        let range = NodeIdRange::new(id(0), id(100));
        let exclude = NodeIdRange::new(id(40), id(60));
        let (first, second) = range.subtract(&exclude);
        assert_eq!(first, NodeIdRange::new(id(0), id(39)));
        assert_eq!(second, NodeIdRange::new(id(61), id(100)));
    }

    #[test]
    fn subtract_full_self_leaves_one_arc() {
        let exclude = NodeIdRange::new(id(10), id(20));
        let (first, second) = NodeIdRange::Full.subtract(&exclude);
        assert_eq!(first, NodeIdRange::new(id(21), id(9)));
        assert!(second.is_empty());
    }

    #[test]
    fn merge_of_adjacent_arcs_is_their_union() {
        let a = NodeIdRange::new(id(0), id(49));
        let b = NodeIdRange::new(id(50), id(99));
        let merged = NodeIdRange::merge(&a, &b).unwrap();
        assert_eq!(merged, NodeIdRange::new(id(0), id(99)));
    }

    #[test]
    fn merge_rejects_non_adjacent_disjoint_ranges() {
        let a = NodeIdRange::new(id(0), id(10));
        let b = NodeIdRange::new(id(50), id(60));
        assert!(NodeIdRange::merge(&a, &b).is_none());
    }

    #[test]
    fn intersect_of_overlapping_arcs_is_the_shared_middle() {
        let a = NodeIdRange::new(id(0), id(60));
        let b = NodeIdRange::new(id(40), id(100));
        let overlap = a.intersect(&b);
        assert_eq!(overlap, vec![NodeIdRange::new(id(40), id(60))]);
    }

    #[test]
    fn intersect_of_disjoint_arcs_is_empty() {
        let a = NodeIdRange::new(id(0), id(10));
        let b = NodeIdRange::new(id(50), id(60));
        assert!(a.intersect(&b).is_empty());
    }

    #[test]
    fn single_node_ring_join_splits_at_midpoint() {
        let n1 = id(0x00000000000000000000000000000001);
        let n2 = id(0x80000000000000000000000000000000);
        let succ_mid = n1.succ_midpoint(n2);
        let pred_mid = n1.pred_midpoint(n2);
        let n1_range = NodeIdRange::new(pred_mid.succ_walk(1), succ_mid);
        let n2_range = NodeIdRange::new(succ_mid.succ_walk(1), pred_mid);
        assert!(n1_range.contains(n1));
        assert!(n2_range.contains(n2));
        assert!(n1_range.disjoint(&n2_range));
        assert_eq!(NodeIdRange::merge(&n1_range, &n2_range), Some(NodeIdRange::Full));
    }

    proptest! {
        #[test]
        fn subtract_empty_is_always_identity(b in any::<u128>(), e in any::<u128>()) {
            let range = NodeIdRange::new(id(b), id(e));
            let (first, second) = range.subtract(&NodeIdRange::Empty);
            prop_assert_eq!(first, range);
            prop_assert!(second.is_empty());
        }

        #[test]
        fn subtract_full_is_always_empty(b in any::<u128>(), e in any::<u128>()) {
            let range = NodeIdRange::new(id(b), id(e));
            let (first, second) = range.subtract(&NodeIdRange::Full);
            prop_assert!(first.is_empty());
            prop_assert!(second.is_empty());
        }
    }
}
