//! `PartnerNode`: the local view of a remote ring member, grounded on
//! `PartnerNode.h`. Every field here is a locally cached observation, not an
//! authoritative source of truth — the remote node's own `RoutingTable` is
//! that.

use federation_ring::{NodeId, NodeInstance, RoutingToken};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Instant;

/// A node's position in the join/leave lifecycle. Ordered: a `PartnerNode`
/// entry's phase may only ever advance along this sequence, never go
/// backward, for a fixed `instance_id` (spec §4.2, `add/update`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Booting,
    Joining,
    Inserting,
    Routing,
    Shutdown,
}

impl Phase {
    /// Whether `self` is a legal follow-on to `self` for the same instance:
    /// strictly forward, or unchanged (a repeated gossip of the same fact).
    pub fn can_advance_to(self, next: Phase) -> bool {
        next >= self
    }

    pub fn is_available(self) -> bool {
        matches!(self, Phase::Inserting | Phase::Routing)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartnerNode {
    pub instance: NodeInstance,
    pub phase: Phase,
    pub physical_address: SocketAddr,
    pub lease_agent_address: Option<SocketAddr>,
    pub token: RoutingToken,
    pub ring_name: String,
    #[serde(skip, default = "Instant::now")]
    pub last_accessed: Instant,
    pub global_time_upper_limit: u64,
}

impl PartnerNode {
    pub fn new(instance: NodeInstance, physical_address: SocketAddr, ring_name: impl Into<String>) -> Self {
        Self {
            instance,
            phase: Phase::Booting,
            physical_address,
            lease_agent_address: None,
            token: RoutingToken::empty(),
            ring_name: ring_name.into(),
            last_accessed: Instant::now(),
            global_time_upper_limit: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.instance.id
    }

    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}
