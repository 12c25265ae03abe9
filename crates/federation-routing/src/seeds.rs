//! Known seeds of foreign rings, consulted for cross-ring forwarding (spec
//! §4.8 step 4). A federation node learns these out of band (static
//! configuration or a ring-directory service); this crate only stores and
//! searches them.

use federation_table::PartnerNode;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct SeedDirectory {
    by_ring: RwLock<HashMap<String, Vec<PartnerNode>>>,
}

impl SeedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_seeds(&self, ring_name: impl Into<String>, seeds: Vec<PartnerNode>) {
        self.by_ring.write().insert(ring_name.into(), seeds);
    }

    pub fn seeds_for(&self, ring_name: &str) -> Vec<PartnerNode> {
        self.by_ring.read().get(ring_name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federation_ring::{NodeId, NodeInstance};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    #[test]
    fn unknown_ring_has_no_seeds() {
        let directory = SeedDirectory::new();
        assert!(directory.seeds_for("ring9").is_empty());
    }

    #[test]
    fn set_and_fetch_round_trips() {
        let directory = SeedDirectory::new();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9100);
        let seed = PartnerNode::new(NodeInstance::new(NodeId::new(1), 1), addr, "ring1");
        directory.set_seeds("ring1", vec![seed.clone()]);
        let seeds = directory.seeds_for("ring1");
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].id(), seed.id());
    }
}
