pub mod global_time;
pub mod update_manager;

pub use global_time::{GlobalTimeInfo, GlobalTimeManager, GlobalTimeManagerConfig};
pub use update_manager::{exponential_targets, UpdateManager, UpdateReply, UpdateRequest};
