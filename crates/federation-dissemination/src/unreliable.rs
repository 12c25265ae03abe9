//! Unreliable broadcast (spec §4.9): best-effort successor/predecessor
//! flooding with a step-count fallback. Grounded on
//! `BroadcastManager.cpp`'s `UnreliableBroadcast` and `OnBroadcast` paths.

use crate::dedup::ExpiringSet;
use bytes::Bytes;
use federation_core::Result;
use federation_table::RoutingTable;
use federation_transport::headers::BroadcastStepHeader;
use federation_transport::Transport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

pub struct UnreliableBroadcast {
    table: Arc<RoutingTable>,
    transport: Arc<dyn Transport>,
    seen: ExpiringSet,
    step_count_max: u32,
    next_broadcast_id: AtomicU64,
}

impl UnreliableBroadcast {
    pub fn new(table: Arc<RoutingTable>, transport: Arc<dyn Transport>, seen: ExpiringSet, step_count_max: u32) -> Self {
        Self {
            table,
            transport,
            seen,
            step_count_max,
            next_broadcast_id: AtomicU64::new(1),
        }
    }

    fn next_broadcast_id(&self) -> u64 {
        self.next_broadcast_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn forward_to_ring_neighbors(&self, payload: Bytes) -> Result<()> {
        let this_id = self.table.this_node_id();
        let mut forwarded_to = Vec::new();
        if let Some(successor) = self.table.successor_of(this_id) {
            if successor.id() != this_id {
                forwarded_to.push(successor);
            }
        }
        if let Some(predecessor) = self.table.predecessor_of(this_id) {
            if predecessor.id() != this_id && !forwarded_to.iter().any(|p| p.id() == predecessor.id()) {
                forwarded_to.push(predecessor);
            }
        }
        for partner in forwarded_to {
            let target = self.transport.resolve_target(partner.physical_address).await?;
            self.transport.send_one_way(&target, payload.clone()).await?;
        }
        Ok(())
    }

    /// Range-broadcasts directly to every known partner this node owns, a
    /// last-resort fanout once `step_count` has grown past
    /// `step_count_max` without the chain reaching everyone.
    async fn range_broadcast(&self, payload: Bytes) -> Result<()> {
        let owned_range = self.table.this_node().token.range();
        for partner in self.table.all_entries() {
            if owned_range.contains(partner.id()) {
                let target = self.transport.resolve_target(partner.physical_address).await?;
                self.transport.send_one_way(&target, payload.clone()).await?;
            }
        }
        Ok(())
    }

    /// Originates a new unreliable broadcast: fresh id, step 0, sent to
    /// both ring neighbors.
    pub async fn broadcast(&self, payload: Bytes) -> Result<u64> {
        let broadcast_id = self.next_broadcast_id();
        self.seen.insert_if_absent(broadcast_id);
        self.forward_to_ring_neighbors(payload).await?;
        Ok(broadcast_id)
    }

    /// Processes an inbound broadcast hop. Returns `true` if this was the
    /// first sighting of `broadcast_id` (and it was therefore forwarded);
    /// `false` for a suppressed duplicate.
    pub async fn on_received(&self, broadcast_id: u64, step: BroadcastStepHeader, payload: Bytes) -> Result<bool> {
        if !self.seen.insert_if_absent(broadcast_id) {
            trace!(broadcast_id, "suppressing duplicate unreliable broadcast");
            return Ok(false);
        }
        if step.count >= self.step_count_max {
            self.range_broadcast(payload.clone()).await?;
        }
        self.forward_to_ring_neighbors(payload).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for UnreliableBroadcast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnreliableBroadcast").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use federation_core::time::FakeClock;
    use federation_ring::NodeInstance;
    use federation_table::{Phase, PartnerNode, RoutingTableConfig};
    use federation_transport::ConnectionFaultHandler;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Mutex;
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    struct RecordingHandle;
    #[async_trait]
    impl federation_transport::SendTargetHandle for RecordingHandle {
        async fn send_one_way(&self, _payload: Bytes) -> Result<()> {
            Ok(())
        }
        async fn begin_request(&self, _payload: Bytes, _timeout: Duration) -> Result<Bytes> {
            Ok(Bytes::new())
        }
    }

    struct RecordingTransport {
        count: Arc<Mutex<u32>>,
    }
    #[async_trait]
    impl Transport for RecordingTransport {
        async fn resolve_target(&self, address: SocketAddr) -> Result<SendTarget> {
            *self.count.lock().unwrap() += 1;
            Ok(SendTarget::new(address, Arc::new(RecordingHandle)))
        }
        fn set_connection_fault_handler(&self, _handler: ConnectionFaultHandler) {}
        fn local_address(&self) -> SocketAddr {
            addr(9000)
        }
    }

    fn table_with_ring() -> Arc<RoutingTable> {
        let mut this_node = PartnerNode::new(NodeInstance::new(federation_ring::NodeId::new(1), 1), addr(9000), "ring0");
        this_node.phase = Phase::Routing;
        let table = Arc::new(RoutingTable::new(this_node, RoutingTableConfig::default()));
        let mut a = PartnerNode::new(NodeInstance::new(federation_ring::NodeId::new(10), 1), addr(9001), "ring0");
        a.phase = Phase::Routing;
        let mut b = PartnerNode::new(NodeInstance::new(federation_ring::NodeId::new(20), 1), addr(9002), "ring0");
        b.phase = Phase::Routing;
        table.add_or_update(a).unwrap();
        table.add_or_update(b).unwrap();
        table
    }

    #[tokio::test]
    async fn originating_a_broadcast_sends_to_both_neighbors() {
        let count = Arc::new(Mutex::new(0));
        let transport = Arc::new(RecordingTransport { count: count.clone() });
        let seen = ExpiringSet::new(Arc::new(FakeClock::new()), Duration::from_secs(60));
        let broadcaster = UnreliableBroadcast::new(table_with_ring(), transport, seen, 5);
        broadcaster.broadcast(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn duplicate_broadcast_id_is_suppressed() {
        let count = Arc::new(Mutex::new(0));
        let transport = Arc::new(RecordingTransport { count: count.clone() });
        let seen = ExpiringSet::new(Arc::new(FakeClock::new()), Duration::from_secs(60));
        let broadcaster = UnreliableBroadcast::new(table_with_ring(), transport, seen, 5);
        let forwarded_first = broadcaster.on_received(42, BroadcastStepHeader { count: 0 }, Bytes::from_static(b"x")).await.unwrap();
        let forwarded_second = broadcaster.on_received(42, BroadcastStepHeader { count: 1 }, Bytes::from_static(b"x")).await.unwrap();
        assert!(forwarded_first);
        assert!(!forwarded_second);
    }

    #[tokio::test]
    async fn exceeding_step_count_max_triggers_a_range_broadcast() {
        let count = Arc::new(Mutex::new(0));
        let transport = Arc::new(RecordingTransport { count: count.clone() });
        let seen = ExpiringSet::new(Arc::new(FakeClock::new()), Duration::from_secs(60));
        let table = table_with_ring();
        table.this_node(); // sanity: table has entries
        let broadcaster = UnreliableBroadcast::new(table, transport, seen, 1);
        broadcaster.on_received(7, BroadcastStepHeader { count: 2 }, Bytes::from_static(b"x")).await.unwrap();
        // range_broadcast (over Empty default token range) contributes 0, plus the 2 ring-neighbor sends.
        assert_eq!(*count.lock().unwrap(), 2);
    }
}
