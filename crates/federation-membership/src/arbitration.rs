//! Arbitration (spec §4.6): quorum-based tie-breaking between a monitor
//! that suspects a subject of lease failure and a quorum of voters.
//! Grounded on `original_source/.../Arbitration*`.

use dashmap::DashMap;
use federation_core::time::Clock;
use federation_ring::NodeId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArbitrationType {
    TwoWaySimple,
    TwoWayExtended,
    OneWay,
    Implicit,
    KeepAlive,
}

/// `Extended | Strong | Continuous | Delayed`, normalized so a subsuming
/// flag drops the weaker one it implies.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Serialize, Deserialize)]
pub struct ArbitrationFlags(u8);

impl ArbitrationFlags {
    pub const NONE: Self = Self(0);
    pub const EXTENDED: Self = Self(1 << 0);
    pub const STRONG: Self = Self(1 << 1);
    pub const CONTINUOUS: Self = Self(1 << 2);
    pub const DELAYED: Self = Self(1 << 3);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `Strong` subsumes `Extended` — a strong grant already implies at
    /// least extended semantics, so once both bits are set, `Extended` is
    /// redundant and is cleared.
    pub fn normalize(self) -> Self {
        if self.contains(Self::STRONG) {
            Self(self.0 & !Self::EXTENDED.0)
        } else {
            self
        }
    }
}

impl std::ops::BitOr for ArbitrationFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0).normalize()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ArbitrationRequest {
    pub monitor: NodeId,
    pub subject: NodeId,
    pub monitor_lease_instance: u64,
    pub subject_lease_instance: u64,
    pub subject_ttl: Duration,
    pub history_needed: Duration,
    pub kind: ArbitrationType,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ArbitrationReply {
    pub subject_ttl: Duration,
    pub monitor_ttl: Duration,
    pub subject_reported: bool,
    pub flags: ArbitrationFlags,
    /// Weight of the replying voter, higher for older, continuously
    /// present voters (spec §4.6: "weights favor older, continuously
    /// present voters").
    pub weight: u32,
}

/// Per-voter record of conflicting claims against a subject, consulted to
/// answer an `ArbitrationRequest` (spec §4.6's voter decision rule).
#[derive(Default)]
pub struct ArbitrationTable {
    last_conflicting_claim: DashMap<NodeId, std::time::Instant>,
}

impl ArbitrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_conflicting_claim(&self, subject: NodeId, clock: &dyn Clock) {
        self.last_conflicting_claim.insert(subject, clock.instant_now());
    }

    /// A voter grants "reject" if it has itself observed a conflicting
    /// claim against `subject` within `history_needed`; "neutral"
    /// otherwise.
    pub fn decide(&self, subject: NodeId, history_needed: Duration, clock: &dyn Clock) -> bool {
        match self.last_conflicting_claim.get(&subject) {
            Some(entry) => clock.instant_now().duration_since(*entry) <= history_needed,
            None => false,
        }
    }
}

/// Aggregates voter replies into the monitor's final reject/neutral
/// decision, per spec §4.6's quorum-rule table.
pub fn aggregate_reject(kind: ArbitrationType, replies: &[ArbitrationReply]) -> bool {
    match kind {
        ArbitrationType::OneWay => true,
        ArbitrationType::Implicit => true,
        ArbitrationType::KeepAlive => replies.iter().any(|r| r.subject_reported),
        ArbitrationType::TwoWaySimple => {
            let total: u32 = replies.iter().map(|r| r.weight).sum();
            let rejecting: u32 = replies.iter().filter(|r| r.subject_reported).map(|r| r.weight).sum();
            total > 0 && rejecting * 2 > total
        }
        ArbitrationType::TwoWayExtended => {
            let total: u32 = replies.iter().map(|r| r.weight).sum();
            let rejecting: u32 = replies.iter().filter(|r| r.subject_reported).map(|r| r.weight).sum();
            let has_strong = replies
                .iter()
                .any(|r| r.subject_reported && r.flags.contains(ArbitrationFlags::STRONG));
            total > 0 && rejecting * 2 > total && has_strong
        }
    }
}
