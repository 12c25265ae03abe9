//! Multi-hop message routing across the ring and across rings (spec
//! §4.8).

pub mod next_hop;
pub mod router;
pub mod seeds;

pub use next_hop::{is_local_delivery, select_next_hop};
pub use router::{LocalDeliveryHandler, RouteHop, RouteTarget, Router};
pub use seeds::SeedDirectory;
