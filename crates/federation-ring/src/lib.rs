//! Ring identity and arithmetic: `NodeId`, `NodeInstance`, `NodeIdRange`, and
//! the `RoutingToken` each node uses to track which slice of the ring it
//! currently owns.

pub mod instance;
pub mod node_id;
pub mod range;
pub mod token;

pub use instance::NodeInstance;
pub use node_id::NodeId;
pub use range::NodeIdRange;
pub use token::{RoutingToken, RECOVERY_INCREMENT};
