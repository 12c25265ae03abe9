//! The local ring view: `PartnerNode` entries, their lifecycle `Phase`, and
//! the `RoutingTable` that keeps them sorted and answers neighborhood,
//! successor/predecessor, and range-partitioning queries.

pub mod partner_node;
pub mod table;

pub use partner_node::{Phase, PartnerNode};
pub use table::{PartitionedRange, RoutingTable, RoutingTableConfig};
