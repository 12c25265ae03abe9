//! Reliable broadcast (spec §4.9): range-partitioned fanout with
//! per-sub-range acknowledgement tracking. Grounded on
//! `BroadcastManager.cpp`'s `BroadcastForwardContext` and its recursive
//! range re-partitioning on each hop.

use bytes::Bytes;
use dashmap::DashMap;
use federation_core::error::ErrorCode;
use federation_core::{FederationError, Result};
use federation_ring::NodeIdRange;
use federation_routing::{RouteTarget, Router};
use federation_table::{PartitionedRange, RoutingTable};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Tracks which sub-ranges of a single reliable broadcast have
/// acknowledged, keyed by the range they were assigned (spec §4.9:
/// "tracks which sub-ranges have been ACKed").
struct ForwardContext {
    outstanding: Vec<NodeIdRange>,
}

impl ForwardContext {
    fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }

    fn ack(&mut self, acked: NodeIdRange) {
        self.outstanding.retain(|range| !acked.contains_range(range));
    }
}

pub struct ReliableBroadcast {
    table: Arc<RoutingTable>,
    router: Arc<Router>,
    retry_timeout: Duration,
    overall_timeout: Duration,
    next_broadcast_id: AtomicU64,
    forwards: DashMap<u64, ForwardContext>,
}

impl ReliableBroadcast {
    pub fn new(table: Arc<RoutingTable>, router: Arc<Router>, retry_timeout: Duration, overall_timeout: Duration) -> Self {
        Self {
            table,
            router,
            retry_timeout,
            overall_timeout,
            next_broadcast_id: AtomicU64::new(1),
            forwards: DashMap::new(),
        }
    }

    fn next_broadcast_id(&self) -> u64 {
        self.next_broadcast_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Partitions the whole ring with `RoutingTable::partition_ranges` and
    /// routes one copy of `payload` to each sub-arc's owner. Returns the
    /// broadcast id the caller tracks acks against. Holes (no known
    /// `Routing` owner for a sub-arc) are logged and excluded from the
    /// outstanding set — there is nobody to wait on an ack from.
    pub async fn begin_broadcast(&self, payload: Bytes) -> Result<u64> {
        self.begin_broadcast_over(payload, NodeIdRange::Full).await
    }

    async fn begin_broadcast_over(&self, payload: Bytes, range: NodeIdRange) -> Result<u64> {
        let broadcast_id = self.next_broadcast_id();
        let partitions = self.table.partition_ranges(range);
        let mut outstanding = Vec::new();

        for partition in &partitions {
            match partition.target {
                Some(owner) => {
                    outstanding.push(partition.range);
                    let target = RouteTarget {
                        id: owner,
                        instance_id: None,
                        exact_instance: false,
                        ring: self.table.this_node().ring_name,
                    };
                    self.router.begin_route(payload.clone(), target, self.retry_timeout, self.overall_timeout).await?;
                }
                None => {
                    debug!(?partition.range, "reliable broadcast sub-range has no known owner, skipping");
                }
            }
        }

        self.forwards.insert(broadcast_id, ForwardContext { outstanding });
        Ok(broadcast_id)
    }

    /// Called when this node receives a sub-range copy: recursively
    /// re-partitions `range` against its own local knowledge and forwards
    /// further, covering any sub-arcs this node doesn't itself own.
    pub async fn on_received_range(&self, payload: Bytes, range: NodeIdRange) -> Result<Vec<PartitionedRange>> {
        let partitions = self.table.partition_ranges(range);
        for partition in &partitions {
            if let Some(owner) = partition.target {
                if owner == self.table.this_node_id() {
                    continue;
                }
                let target = RouteTarget {
                    id: owner,
                    instance_id: None,
                    exact_instance: false,
                    ring: self.table.this_node().ring_name,
                };
                self.router.begin_route(payload.clone(), target, self.retry_timeout, self.overall_timeout).await?;
            }
        }
        Ok(partitions)
    }

    /// Records an ack for `range` against `broadcast_id`. Returns `true`
    /// the moment every sub-range has acknowledged.
    pub fn ack(&self, broadcast_id: u64, range: NodeIdRange) -> Result<bool> {
        let mut entry = self
            .forwards
            .get_mut(&broadcast_id)
            .ok_or_else(|| FederationError::new(ErrorCode::InvalidArgument, "ack for an unknown or already-completed broadcast id"))?;
        entry.ack(range);
        Ok(entry.is_complete())
    }

    pub fn outstanding_count(&self, broadcast_id: u64) -> Option<usize> {
        self.forwards.get(&broadcast_id).map(|entry| entry.outstanding.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use federation_p2p::RequestTable;
    use federation_ring::{NodeId, NodeInstance};
    use federation_routing::{LocalDeliveryHandler, SeedDirectory};
    use federation_table::{Phase, PartnerNode, RoutingTableConfig};
    use federation_transport::headers::RoutingHeader;
    use federation_transport::{ConnectionFaultHandler, SendTarget, SendTargetHandle};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    struct NoopHandle;
    #[async_trait]
    impl SendTargetHandle for NoopHandle {
        async fn send_one_way(&self, _payload: Bytes) -> Result<()> {
            Ok(())
        }
        async fn begin_request(&self, _payload: Bytes, _timeout: Duration) -> Result<Bytes> {
            Ok(Bytes::new())
        }
    }
    struct NoopTransport;
    #[async_trait]
    impl federation_transport::Transport for NoopTransport {
        async fn resolve_target(&self, address: SocketAddr) -> Result<SendTarget> {
            Ok(SendTarget::new(address, Arc::new(NoopHandle)))
        }
        fn set_connection_fault_handler(&self, _handler: ConnectionFaultHandler) {}
        fn local_address(&self) -> SocketAddr {
            addr(9000)
        }
    }
    struct NoopLocal;
    #[async_trait]
    impl LocalDeliveryHandler for NoopLocal {
        async fn deliver(&self, _header: RoutingHeader, payload: Bytes) -> Result<Option<Bytes>> {
            Ok(Some(payload))
        }
    }

    fn router_with_two_owners() -> (Arc<RoutingTable>, Arc<Router>) {
        let mut this_node = PartnerNode::new(NodeInstance::new(NodeId::new(1), 1), addr(9000), "ring0");
        this_node.phase = Phase::Routing;
        let table = Arc::new(RoutingTable::new(this_node, RoutingTableConfig::default()));
        let mut other = PartnerNode::new(NodeInstance::new(NodeId::new(100), 1), addr(9001), "ring0");
        other.phase = Phase::Routing;
        table.add_or_update(other).unwrap();
        let router = Arc::new(Router::new(
            table.clone(),
            Arc::new(NoopTransport),
            Arc::new(RequestTable::new()),
            Arc::new(SeedDirectory::new()),
            Arc::new(NoopLocal),
        ));
        (table, router)
    }

    #[tokio::test]
    async fn begin_broadcast_partitions_the_whole_ring_between_known_owners() {
        let (table, router) = router_with_two_owners();
        let broadcaster = ReliableBroadcast::new(table, router, Duration::from_millis(50), Duration::from_secs(1));
        let id = broadcaster.begin_broadcast(Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(broadcaster.outstanding_count(id), Some(2));
    }

    #[tokio::test]
    async fn acking_every_sub_range_completes_the_broadcast() {
        let (table, router) = router_with_two_owners();
        let broadcaster = ReliableBroadcast::new(table.clone(), router, Duration::from_millis(50), Duration::from_secs(1));
        let id = broadcaster.begin_broadcast(Bytes::from_static(b"hi")).await.unwrap();
        let partitions = table.partition_ranges(NodeIdRange::Full);
        let mut done = false;
        for partition in partitions {
            done = broadcaster.ack(id, partition.range).unwrap();
        }
        assert!(done);
        assert_eq!(broadcaster.outstanding_count(id), Some(0));
    }

    #[tokio::test]
    async fn no_known_owner_leaves_no_outstanding_sub_ranges() {
        let mut this_node = PartnerNode::new(NodeInstance::new(NodeId::new(1), 1), addr(9000), "ring0");
        this_node.phase = Phase::Booting;
        let table = Arc::new(RoutingTable::new(this_node, RoutingTableConfig::default()));
        let router = Arc::new(Router::new(
            table.clone(),
            Arc::new(NoopTransport),
            Arc::new(RequestTable::new()),
            Arc::new(SeedDirectory::new()),
            Arc::new(NoopLocal),
        ));
        let broadcaster = ReliableBroadcast::new(table, router, Duration::from_millis(50), Duration::from_secs(1));
        let id = broadcaster.begin_broadcast(Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(broadcaster.outstanding_count(id), Some(0));
    }
}
