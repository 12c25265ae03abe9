//! Join handshake, neighborhood ping/discovery, and arbitration (spec §4.4,
//! §4.5, §4.6).

pub mod arbitration;
pub mod join;
pub mod ping;

pub use arbitration::{ArbitrationFlags, ArbitrationReply, ArbitrationRequest, ArbitrationTable, ArbitrationType};
pub use join::{JoinLock, JoinLockTable, TokenAccumulator};
pub use ping::{PingReplyBody, PingRequestBody, UnknownNodeTracker};
