//! `NodeInstance`: a node id paired with a monotonically increasing
//! incarnation counter, so a restarted process is recognized as the same
//! logical node while any stale state tagged with its old incarnation is
//! superseded rather than merged.

use crate::node_id::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeInstance {
    pub id: NodeId,
    pub instance_id: u64,
}

impl NodeInstance {
    pub const fn new(id: NodeId, instance_id: u64) -> Self {
        Self { id, instance_id }
    }

    /// Two instances refer to the same logical node (same ring point)
    /// regardless of incarnation.
    pub fn is_same_node(self, other: NodeInstance) -> bool {
        self.id == other.id
    }

    /// `other` is a strictly newer incarnation of the same logical node and
    /// therefore supersedes `self`.
    pub fn is_superseded_by(self, other: NodeInstance) -> bool {
        self.is_same_node(other) && other.instance_id > self.instance_id
    }
}

impl fmt::Debug for NodeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.id, self.instance_id)
    }
}

impl fmt::Display for NodeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.id, self.instance_id)
    }
}
