//! The Paxos-like replicated key-value store backing leader election,
//! epoch bookkeeping, and other small cluster-wide facts the overlay needs
//! strong consistency for (spec §4.7).

pub mod bootstrap;
pub mod replica;
pub mod store;
pub mod value;

pub use bootstrap::{accepts_bootstrap_request, elect_leader, next_generation};
pub use replica::{Replica, ReplicaPhase, ReplicaSet};
pub use store::{VoterStore, WriteOutcome};
pub use value::StoreValue;
