//! `RoutingToken`: the versioned range a node currently owns for routing
//! purposes, grounded on `RoutingToken.h`/`RoutingToken.cpp`'s accept/split/
//! release state machine. A token's range only ever changes through these
//! methods, each of which bumps the version so staler announcements can be
//! told apart from newer ones during the join and gossip protocols.

use crate::node_id::NodeId;
use crate::range::NodeIdRange;
use federation_core::error::ErrorCode;
use federation_core::{FederationError, Result};
use serde::{Deserialize, Serialize};

/// Versions further behind the current one than this are treated as a
/// recovered node replaying stale state rather than a legitimate update,
/// mirroring the original's merge-safety guard against a node that
/// restarted mid-incarnation and is still gossiping its pre-restart token.
pub const RECOVERY_INCREMENT: u64 = 1_000_000;

/// Ring-steps spanned by `range`, used only to compare two split pieces by
/// size; `Full` and `Empty` never appear here since both call sites split a
/// bounded `Arc`.
fn arc_ring_steps(range: NodeIdRange) -> u128 {
    match range {
        NodeIdRange::Arc { begin, end } => begin.succ_dist(end),
        NodeIdRange::Full => u128::MAX,
        NodeIdRange::Empty => 0,
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RoutingToken {
    range: NodeIdRange,
    version: u64,
}

impl RoutingToken {
    pub fn new(range: NodeIdRange, version: u64) -> Self {
        Self { range, version }
    }

    pub fn empty() -> Self {
        Self::new(NodeIdRange::Empty, 0)
    }

    pub fn range(&self) -> NodeIdRange {
        self.range
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Whether a token announcement at `incoming_version` is safe to merge
    /// into this one, rather than a stale replay from before a recovery.
    pub fn is_merge_safe(&self, incoming_version: u64) -> bool {
        incoming_version >= self.version.saturating_sub(RECOVERY_INCREMENT)
    }

    /// Unconditionally overwrites the held range if `version` is newer, or
    /// this token is still the empty bootstrap token. Used when a node
    /// learns its own authoritative token from the voter store rather than
    /// merging a peer's announcement.
    pub fn update(&mut self, range: NodeIdRange, version: u64) -> bool {
        if self.is_empty() || version > self.version {
            self.range = range;
            self.version = version;
            true
        } else {
            false
        }
    }

    /// Merges a peer's announced range into this token's held range.
    /// Rejects the merge if the peer's version looks like a stale replay,
    /// or if the two ranges are neither overlapping nor adjacent.
    pub fn accept(&mut self, incoming_range: NodeIdRange, incoming_version: u64) -> Result<()> {
        if !self.is_merge_safe(incoming_version) {
            return Err(FederationError::new(
                ErrorCode::StaleRequest,
                format!(
                    "token version {incoming_version} predates the recovery window of current version {}",
                    self.version
                ),
            ));
        }
        let merged = NodeIdRange::merge(&self.range, &incoming_range).ok_or_else(|| {
            FederationError::new(
                ErrorCode::InvalidArgument,
                "incoming range is neither overlapping nor adjacent to the held range",
            )
        })?;
        self.range = merged;
        self.version = self.version.max(incoming_version) + 1;
        Ok(())
    }

    /// Drops the held range entirely, e.g. when this node is handing off
    /// all routing responsibility during a graceful shutdown.
    pub fn set_empty(&mut self) {
        self.range = NodeIdRange::Empty;
        self.version += 1;
    }

    fn arc_bounds(&self) -> Result<(NodeId, NodeId)> {
        match self.range {
            NodeIdRange::Arc { begin, end } => Ok((begin, end)),
            NodeIdRange::Empty => Err(FederationError::new(
                ErrorCode::InvalidConfiguration,
                "cannot split an empty token",
            )),
            NodeIdRange::Full => Err(FederationError::new(
                ErrorCode::InvalidConfiguration,
                "cannot split a full token directly; use split_from_full for single-node-ring bootstrap",
            )),
        }
    }

    /// Splits off the successor-side portion of this token's range for a
    /// newly joined node, at the ring midpoint between `owner_id` (the node
    /// currently holding this token) and `new_node`, which must fall
    /// within the held range. Returns the new token granted to `new_node`.
    pub fn split_succ(&mut self, owner_id: NodeId, new_node: NodeId) -> Result<RoutingToken> {
        if !self.range.contains(new_node) {
            return Err(FederationError::new(
                ErrorCode::InvalidArgument,
                "new node id does not fall within the held range",
            ));
        }
        let (begin, end) = self.arc_bounds()?;
        let split_point = owner_id.succ_midpoint(new_node);
        let granted = NodeIdRange::new(split_point.succ_walk(1), end);
        self.range = NodeIdRange::new(begin, split_point);
        self.version += 1;
        Ok(RoutingToken::new(granted, 1))
    }

    /// Symmetric to [`split_succ`](Self::split_succ), granting the
    /// predecessor-side portion instead.
    pub fn split_pred(&mut self, owner_id: NodeId, new_node: NodeId) -> Result<RoutingToken> {
        if !self.range.contains(new_node) {
            return Err(FederationError::new(
                ErrorCode::InvalidArgument,
                "new node id does not fall within the held range",
            ));
        }
        let (begin, end) = self.arc_bounds()?;
        let split_point = owner_id.pred_midpoint(new_node);
        let granted = NodeIdRange::new(begin, split_point.pred_walk(1));
        self.range = NodeIdRange::new(split_point, end);
        self.version += 1;
        Ok(RoutingToken::new(granted, 1))
    }

    /// Voluntary release to the successor (spec §4.1: "owner goes down
    /// voluntarily"). Splits the held range at the midpoint between
    /// `pred_id` and `succ_id` — not at the owner's own id, since the owner
    /// is leaving and keeps no anchor advantage over either neighbor — into
    /// a predecessor-side and a successor-side piece. Only the larger of
    /// the two pieces is hers to hand off here; the caller releases the
    /// other piece to the predecessor through [`release_pred`](Self::release_pred).
    /// Either way this token is emptied: a voluntary release abandons the
    /// whole range, not just the piece it manages to hand off directly.
    pub fn release_succ(&mut self, pred_id: NodeId, succ_id: NodeId) -> Result<Option<RoutingToken>> {
        let (near_pred, near_succ) = self.split_at_midpoint(pred_id, succ_id)?;
        self.set_empty();
        if arc_ring_steps(near_succ) >= arc_ring_steps(near_pred) {
            Ok(Some(RoutingToken::new(near_succ, 1)))
        } else {
            Ok(None)
        }
    }

    /// Symmetric to [`release_succ`](Self::release_succ): hands the
    /// predecessor-side piece to `pred_id` when it's the larger of the two.
    pub fn release_pred(&mut self, pred_id: NodeId, succ_id: NodeId) -> Result<Option<RoutingToken>> {
        let (near_pred, near_succ) = self.split_at_midpoint(pred_id, succ_id)?;
        self.set_empty();
        if arc_ring_steps(near_pred) >= arc_ring_steps(near_succ) {
            Ok(Some(RoutingToken::new(near_pred, 1)))
        } else {
            Ok(None)
        }
    }

    /// The held range split at `pred_id.succ_midpoint(succ_id)` into
    /// `(near_pred, near_succ)`, without mutating `self`.
    fn split_at_midpoint(&self, pred_id: NodeId, succ_id: NodeId) -> Result<(NodeIdRange, NodeIdRange)> {
        let (begin, end) = self.arc_bounds()?;
        let mid = pred_id.succ_midpoint(succ_id);
        let near_pred = NodeIdRange::new(begin, mid);
        let near_succ = NodeIdRange::new(mid.succ_walk(1), end);
        Ok((near_pred, near_succ))
    }

    /// Splits the whole ring between the sole existing owner of a
    /// single-node ring and a newly joined second node, the degenerate
    /// bootstrap case `split_succ`/`split_pred` cannot express because a
    /// `Full` range has no fixed boundary to split around.
    pub fn split_from_full(&mut self, owner_id: NodeId, new_node: NodeId) -> Result<RoutingToken> {
        if !self.range.is_full() {
            return Err(FederationError::new(
                ErrorCode::InvalidConfiguration,
                "split_from_full requires a full-ring token",
            ));
        }
        let succ_mid = owner_id.succ_midpoint(new_node);
        let pred_mid = owner_id.pred_midpoint(new_node);
        self.range = NodeIdRange::new(pred_mid.succ_walk(1), succ_mid);
        self.version += 1;
        Ok(RoutingToken::new(
            NodeIdRange::new(succ_mid.succ_walk(1), pred_mid),
            1,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(v: u128) -> NodeId {
        NodeId::new(v)
    }

    #[test]
    fn accept_merges_adjacent_range_and_bumps_version() {
        let mut token = RoutingToken::new(NodeIdRange::new(id(0), id(49)), 5);
        let incoming = NodeIdRange::new(id(50), id(99));
        token.accept(incoming, 5).unwrap();
        assert_eq!(token.range(), NodeIdRange::new(id(0), id(99)));
        assert_eq!(token.version(), 6);
    }

    #[test]
    fn accept_rejects_stale_recovered_version() {
        let mut token = RoutingToken::new(NodeIdRange::new(id(0), id(49)), 2_000_000);
        let incoming = NodeIdRange::new(id(50), id(99));
        let err = token.accept(incoming, 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::StaleRequest);
    }

    #[test]
    fn accept_rejects_non_adjacent_range() {
        let mut token = RoutingToken::new(NodeIdRange::new(id(0), id(10)), 1);
        let incoming = NodeIdRange::new(id(50), id(60));
        let err = token.accept(incoming, 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn split_succ_grants_a_disjoint_range_that_reunites_with_the_remainder() {
        let owner = id(10);
        let new_node = id(40);
        let mut token = RoutingToken::new(NodeIdRange::new(owner, id(100)), 1);
        let granted = token.split_succ(owner, new_node).unwrap();

        assert!(token.range().disjoint(&granted.range()));
        assert_eq!(
            NodeIdRange::merge(&token.range(), &granted.range()),
            Some(NodeIdRange::new(owner, id(100)))
        );
        assert!(granted.range().contains(new_node));
        assert_eq!(token.version(), 2);
    }

    #[test]
    fn split_succ_rejects_node_outside_held_range() {
        let owner = id(10);
        let mut token = RoutingToken::new(NodeIdRange::new(owner, id(100)), 1);
        let err = token.split_succ(owner, id(200)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn split_from_full_partitions_the_whole_ring_between_the_two_nodes() {
        let owner = id(0x1000_0000_0000_0000_0000_0000_0000_0000);
        let new_node = id(0x9000_0000_0000_0000_0000_0000_0000_0000);
        let mut token = RoutingToken::new(NodeIdRange::Full, 1);
        let granted = token.split_from_full(owner, new_node).unwrap();

        assert!(token.range().contains(owner));
        assert!(granted.range().contains(new_node));
        assert!(token.range().disjoint(&granted.range()));
        assert_eq!(
            NodeIdRange::merge(&token.range(), &granted.range()),
            Some(NodeIdRange::Full)
        );
    }

    #[test]
    fn split_from_full_rejects_non_full_token() {
        let mut token = RoutingToken::new(NodeIdRange::new(id(0), id(10)), 1);
        let err = token.split_from_full(id(0), id(5)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn release_succ_transfers_the_larger_arc_and_empties_the_owner() {
        let pred = id(0);
        let owner = id(40);
        let succ = id(100);
        let mut token = RoutingToken::new(NodeIdRange::new(owner, id(99)), 1);
        let transferred = token.release_succ(pred, succ).unwrap();
        // midpoint between 0 and 100 is 50; the owner's held range [40,99]
        // splits into [40,50] (11 steps) and [51,99] (49 steps); the
        // successor side is larger.
        let transferred = transferred.expect("successor side is the larger piece");
        assert_eq!(transferred.range(), NodeIdRange::new(id(51), id(99)));
        assert!(token.is_empty());
        assert_eq!(token.version(), 2);
    }

    #[test]
    fn release_pred_is_none_when_the_successor_side_is_larger() {
        let pred = id(0);
        let owner = id(40);
        let succ = id(100);
        let mut token = RoutingToken::new(NodeIdRange::new(owner, id(99)), 1);
        let transferred = token.release_pred(pred, succ).unwrap();
        assert!(transferred.is_none());
        assert!(token.is_empty());
    }

    #[test]
    fn release_pred_transfers_the_larger_arc_when_it_favors_the_predecessor() {
        let pred = id(0);
        let succ = id(100);
        let mut token = RoutingToken::new(NodeIdRange::new(id(10), id(60)), 1);
        let transferred = token.release_pred(pred, succ).unwrap();
        // midpoint between 0 and 100 is 50; [10,50] (40 steps) outweighs
        // [51,60] (9 steps), so the predecessor side wins.
        let transferred = transferred.expect("predecessor side is the larger piece");
        assert_eq!(transferred.range(), NodeIdRange::new(id(10), id(50)));
        assert!(token.is_empty());
        let mut token2 = RoutingToken::new(NodeIdRange::new(id(10), id(60)), 1);
        assert!(token2.release_succ(pred, succ).unwrap().is_none());
    }

    #[test]
    fn set_empty_clears_range_and_bumps_version() {
        let mut token = RoutingToken::new(NodeIdRange::new(id(0), id(10)), 3);
        token.set_empty();
        assert!(token.is_empty());
        assert_eq!(token.version(), 4);
    }
}
