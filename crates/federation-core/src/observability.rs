//! Stable span and field names shared across components, the way
//! `spark-core::observability::keys` centralizes its tag vocabulary so two
//! crates never drift into `node_id` vs `nodeId` for the same concept.

/// Field name for a node's 128-bit ring identifier, rendered as lowercase hex.
pub const FIELD_NODE_ID: &str = "node_id";
/// Field name for a `NodeInstance`'s incarnation counter.
pub const FIELD_INSTANCE_ID: &str = "instance_id";
/// Field name for a voter-store replica-set generation.
pub const FIELD_GENERATION: &str = "generation";
/// Field name for a voter-store replica-set epoch.
pub const FIELD_EPOCH: &str = "epoch";
/// Field name for the P2P/Routing actor a message is addressed to.
pub const FIELD_ACTOR: &str = "actor";
/// Field name for a correlated request/message id.
pub const FIELD_MESSAGE_ID: &str = "message_id";
/// Field name for a broadcast's dedup id.
pub const FIELD_BROADCAST_ID: &str = "broadcast_id";
/// Field name for a ring name, when cross-ring routing is in play.
pub const FIELD_RING_NAME: &str = "ring_name";

/// Span names for the long-running state machines, one per logical
/// operation (one join attempt, one voter-store write, one arbitration
/// round), so a trace viewer can correlate all events belonging to a single
/// attempt the way `spark-transport-tcp` scopes a span per connection.
pub mod spans {
    pub const JOIN_ATTEMPT: &str = "federation.join_attempt";
    pub const PING_ROUND: &str = "federation.ping_round";
    pub const ARBITRATION_ROUND: &str = "federation.arbitration_round";
    pub const VOTER_STORE_WRITE: &str = "federation.voter_store.write";
    pub const VOTER_STORE_BOOTSTRAP: &str = "federation.voter_store.bootstrap";
    pub const VOTER_STORE_FAILOVER: &str = "federation.voter_store.failover";
    pub const ROUTE_OPERATION: &str = "federation.route";
    pub const BROADCAST_OPERATION: &str = "federation.broadcast";
    pub const MULTICAST_OPERATION: &str = "federation.multicast";
    pub const UPDATE_ROUND: &str = "federation.update_round";
}
