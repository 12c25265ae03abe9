//! The external transport contract and wire header vocabulary (spec §6).
//! Components depend on this crate, never on a concrete transport; the only
//! implementation in this workspace is `federation-transport-tcp`, a minimal
//! reference transport, and tests use an in-memory fake built against the
//! same `Transport` trait.

pub mod contract;
pub mod headers;

pub use contract::{ConnectionFaultHandler, SendTarget, SendTargetHandle, Transport};
