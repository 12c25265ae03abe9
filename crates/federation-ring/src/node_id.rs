//! 128-bit ring identifier and its modular arithmetic, grounded on
//! `NodeId.h`/`NodeId.cpp`'s `LargeInteger`-based distance and walk
//! operations. All arithmetic wraps modulo 2^128; a `u128` already wraps at
//! exactly that modulus, so no separate big-integer type is needed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A point on the 128-bit identifier ring.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u128);

impl NodeId {
    pub const MIN: NodeId = NodeId(u128::MIN);
    pub const MAX: NodeId = NodeId(u128::MAX);

    pub const fn new(value: u128) -> Self {
        NodeId(value)
    }

    pub const fn value(self) -> u128 {
        self.0
    }

    /// Distance walking forward (increasing id, wrapping past `MAX` back to
    /// `MIN`) from `self` to `other`.
    pub fn succ_dist(self, other: NodeId) -> u128 {
        other.0.wrapping_sub(self.0)
    }

    /// Distance walking backward from `self` to `other`.
    pub fn pred_dist(self, other: NodeId) -> u128 {
        self.0.wrapping_sub(other.0)
    }

    /// The point reached by walking `dist` steps forward from `self`.
    pub fn succ_walk(self, dist: u128) -> NodeId {
        NodeId(self.0.wrapping_add(dist))
    }

    /// The point reached by walking `dist` steps backward from `self`.
    pub fn pred_walk(self, dist: u128) -> NodeId {
        NodeId(self.0.wrapping_sub(dist))
    }

    /// The point halfway between `self` and `other`, walking forward. Used
    /// to split a token range between an owner and its successor: the owner
    /// keeps everything up to and including this point.
    pub fn succ_midpoint(self, other: NodeId) -> NodeId {
        self.succ_walk(self.succ_dist(other) / 2)
    }

    /// The point halfway between `self` and `other`, walking backward. Used
    /// to split a token range between an owner and its predecessor.
    pub fn pred_midpoint(self, other: NodeId) -> NodeId {
        self.pred_walk(self.pred_dist(other) / 2)
    }

    /// Ring distance to `other`, taking whichever direction is shorter. Used
    /// to pick the next routing hop and to rank neighborhood candidates.
    pub fn min_dist(self, other: NodeId) -> u128 {
        self.succ_dist(other).min(self.pred_dist(other))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:032x})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl From<u128> for NodeId {
    fn from(value: u128) -> Self {
        NodeId(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn succ_and_pred_dist_are_complementary() {
        let a = NodeId::new(10);
        let b = NodeId::new(20);
        assert_eq!(a.succ_dist(b), 10);
        assert_eq!(b.pred_dist(a), 10);
        assert_eq!(a.pred_dist(b), u128::MAX - 9);
    }

    #[test]
    fn succ_dist_wraps_past_max() {
        let a = NodeId::MAX;
        let b = NodeId::new(5);
        assert_eq!(a.succ_dist(b), 6);
    }

    #[test]
    fn succ_midpoint_is_between_the_two_points() {
        let a = NodeId::new(0);
        let b = NodeId::new(100);
        assert_eq!(a.succ_midpoint(b), NodeId::new(50));
    }

    #[test]
    fn pred_midpoint_is_between_the_two_points() {
        let a = NodeId::new(100);
        let b = NodeId::new(0);
        assert_eq!(a.pred_midpoint(b), NodeId::new(50));
    }

    #[test]
    fn min_dist_picks_the_shorter_direction() {
        let a = NodeId::new(0);
        let b = NodeId::new(u128::MAX - 1);
        // walking backward from 0 to MAX-1 is distance 2; forward is huge.
        assert_eq!(a.min_dist(b), 2);
    }

    proptest! {
        #[test]
        fn succ_dist_round_trips_through_walk(a in any::<u128>(), dist in any::<u128>()) {
            let id = NodeId::new(a);
            let walked = id.succ_walk(dist);
            prop_assert_eq!(id.succ_dist(walked), dist);
        }

        #[test]
        fn succ_and_pred_dist_sum_to_zero_or_full_ring(a in any::<u128>(), b in any::<u128>()) {
            let a = NodeId::new(a);
            let b = NodeId::new(b);
            let sum = a.succ_dist(b).wrapping_add(a.pred_dist(b));
            prop_assert!(sum == 0);
        }
    }
}
