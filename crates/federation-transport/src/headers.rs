//! Wire-critical message headers (spec §6): the set of header records every
//! component attaches to an outgoing message, independent of whatever byte
//! encoding the transport uses. Unknown headers are preserved and forwarded
//! untouched by intermediate hops (spec §9) — callers that don't recognize a
//! header field must not drop it, only `FederationMessage` decides which
//! headers are present on a given message.

use federation_ring::{NodeId, NodeIdRange, NodeInstance};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    Direct,
    Federation,
    Routing,
    Broadcast,
}

/// PToP `{from, to, actor, from_ring, to_ring, exact_instance}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PToPHeader {
    pub from: NodeInstance,
    pub from_ring: String,
    pub to: NodeInstance,
    pub to_ring: String,
    pub actor: Actor,
    pub exact_instance: bool,
}

/// Routing `{from, from_ring, to, to_ring, message_id, expiration,
/// retry_timeout, use_exact_routing, expects_reply}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingHeader {
    pub from: NodeInstance,
    pub from_ring: String,
    pub to: NodeId,
    pub to_ring: String,
    pub message_id: u64,
    pub expiration_millis: u64,
    pub retry_timeout_millis: u64,
    pub use_exact_routing: bool,
    pub expects_reply: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatesToHeader {
    pub message_id: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FaultHeader {
    pub error_code_value: u32,
    pub has_message: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastHeader {
    pub from: NodeInstance,
    pub broadcast_id: u64,
    pub expects_reply: bool,
    pub expects_ack: bool,
    pub from_ring: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BroadcastRangeHeader {
    pub range: NodeIdRange,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BroadcastStepHeader {
    pub count: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BroadcastRelatesToHeader {
    pub message_id: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MulticastTargetsHeader {
    pub targets: Vec<NodeInstance>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeFlags {
    None,
    EndToEnd,
}

/// PartnerNode wire header `{instance, phase, address, lease_agent_address,
/// lease_agent_instance_id, token, fault_domain, ring_name, flags,
/// is_end_to_end}`. Distinct from `federation-table::PartnerNode`: this is
/// the serialized shape piggy-backed on replies, not the local cached view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartnerNodeHeader {
    pub instance: NodeInstance,
    pub phase_ordinal: u8,
    pub address: SocketAddr,
    pub lease_agent_address: Option<SocketAddr>,
    pub lease_agent_instance_id: u64,
    pub token_range: NodeIdRange,
    pub token_version: u64,
    pub fault_domain: String,
    pub ring_name: String,
    pub flags: NodeFlags,
    pub is_end_to_end: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct NeighborhoodRangeHeader {
    pub range: NodeIdRange,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GlobalTimeExchangeHeader {
    pub epoch: u64,
    pub send_time_millis: u64,
    pub sender_lower_limit_millis: u64,
    pub receiver_upper_limit_millis: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FabricCodeVersionHeader {
    pub version: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct JoinThrottleHeader {
    pub outstanding_join_count: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TcpClientIdHeader {
    pub client_id: String,
}

/// VoterStore `{down_voters}` — the down-voter propagation header from
/// spec §4.7's "Down-voter propagation": every message carries the set of
/// voters the sender has locally marked down, accelerating convergence
/// after a partition heals.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VoterStoreHeader {
    pub down_voters: Vec<NodeId>,
}

/// RoutingToken transfer `{range, source_version, target_version}`, handed
/// off during Join (spec §4.4 step 3) and Release (spec §4.1).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TokenTransferHeader {
    pub range: NodeIdRange,
    pub source_version: u64,
    pub target_version: u64,
}
