pub mod dedup;
pub mod multicast;
pub mod reliable;
pub mod reply;
pub mod unreliable;

pub use dedup::ExpiringSet;
pub use multicast::{Multicast, MulticastLocalHandler, MulticastReply, MulticastReplyContext};
pub use reliable::ReliableBroadcast;
pub use reply::{BroadcastReply, BroadcastReplyContext};
pub use unreliable::UnreliableBroadcast;
