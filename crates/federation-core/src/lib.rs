//! Ambient stack shared by every federation-overlay crate: the closed error
//! taxonomy, tuning configuration, observability key vocabulary, a clock
//! abstraction, and the per-ring runtime context components are constructed
//! with. Every other crate in this workspace depends on `federation-core`
//! and nothing else flows the other way.

pub mod config;
pub mod context;
pub mod error;
pub mod observability;
pub mod time;

pub use config::{FederationConfig, VoterConfig, VoterKind};
pub use context::{CoreContext, ShutdownSignal};
pub use error::{ErrorCategory, ErrorCode, FederationError, Result};
pub use time::{Clock, FakeClock, SystemClock};
