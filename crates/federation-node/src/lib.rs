//! Top-level assembly crate: wires every other `federation-*` crate's
//! components into one running node, the way `federation_core::CoreContext`
//! itself asks to be used — one context per ring, threaded through every
//! constructor rather than reached for as a global.

pub mod arbitrate;
pub mod delivery;
pub mod gossip;
pub mod node;
pub mod voterstore;
pub mod wire;

pub use arbitrate::run_arbitration;
pub use delivery::DispatchingLocalDelivery;
pub use gossip::{
    spawn_global_time_epoch_task, spawn_hood_ping_task, spawn_routing_table_compaction_task, spawn_unknown_node_sweep_task,
    spawn_update_manager_task,
};
pub use node::FederationNode;
pub use voterstore::{run_bootstrap, run_failover, spawn_voterstore_bootstrap_task, write_and_sync};
pub use wire::{encode, Envelope, NodeInboundHandler};
