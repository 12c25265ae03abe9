//! Multi-hop `BeginRoute`/request-reply routing (spec §4.8). Grounded on
//! `RoutingAsyncOperation.cpp`'s retry-with-re-resolution loop, collapsed
//! from its callback chain into a single retry loop around
//! `federation_p2p::RequestTable::await_reply`.

use crate::next_hop::{is_local_delivery, select_next_hop};
use crate::seeds::SeedDirectory;
use async_trait::async_trait;
use bytes::Bytes;
use federation_core::error::ErrorCode;
use federation_core::{FederationError, Result};
use federation_p2p::RequestTable;
use federation_ring::NodeId;
use federation_table::{PartnerNode, RoutingTable};
use federation_transport::headers::RoutingHeader;
use federation_transport::Transport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// A route destination: a ring-scoped node id, optionally pinned to an
/// exact incarnation.
#[derive(Clone, Debug)]
pub struct RouteTarget {
    pub id: NodeId,
    pub instance_id: Option<u64>,
    pub exact_instance: bool,
    pub ring: String,
}

impl RouteTarget {
    pub fn local(id: NodeId, ring: impl Into<String>) -> Self {
        Self {
            id,
            instance_id: None,
            exact_instance: false,
            ring: ring.into(),
        }
    }
}

/// Delivers a message that has reached the hop owning `target_id`'s token
/// range. Implemented by whatever in-process actor the node wires in
/// (spec §4.3's Federation actor, typically) rather than by this crate,
/// since `federation-routing` has no notion of message payload contents.
#[async_trait]
pub trait LocalDeliveryHandler: Send + Sync + 'static {
    async fn deliver(&self, header: RoutingHeader, payload: Bytes) -> Result<Option<Bytes>>;
}

enum Hop {
    Local,
    Remote(PartnerNode),
}

/// Where an already-built `RoutingHeader` should go next, from this node's
/// current view of the ring. Exposed so the node wiring this crate together
/// can re-resolve an inbound wire frame's hop without `Router` needing any
/// notion of how that frame was encoded on the wire.
pub enum RouteHop {
    Local,
    Remote(PartnerNode),
}

/// Ties a `RoutingTable`, a `Transport`, and a `RequestTable` together into
/// the hop-by-hop routing algorithm of spec §4.8.
pub struct Router {
    table: Arc<RoutingTable>,
    transport: Arc<dyn Transport>,
    request_table: Arc<RequestTable>,
    seeds: Arc<SeedDirectory>,
    local_handler: Arc<dyn LocalDeliveryHandler>,
    next_message_id: AtomicU64,
}

impl Router {
    pub fn new(
        table: Arc<RoutingTable>,
        transport: Arc<dyn Transport>,
        request_table: Arc<RequestTable>,
        seeds: Arc<SeedDirectory>,
        local_handler: Arc<dyn LocalDeliveryHandler>,
    ) -> Self {
        Self {
            table,
            transport,
            request_table,
            seeds,
            local_handler,
            next_message_id: AtomicU64::new(1),
        }
    }

    fn next_message_id(&self) -> u64 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    fn select_hop(&self, target: &RouteTarget) -> Result<Hop> {
        let this = self.table.this_node();
        if target.ring == this.ring_name {
            if is_local_delivery(this.token.range(), target.id) {
                return Ok(Hop::Local);
            }
            let candidates = self.table.all_entries();
            select_next_hop(&candidates, target.id)
                .map(Hop::Remote)
                .ok_or_else(|| FederationError::new(ErrorCode::EndpointNotFound, "no known partner toward this target"))
        } else {
            let seeds = self.seeds.seeds_for(&target.ring);
            select_next_hop(&seeds, target.id)
                .map(Hop::Remote)
                .ok_or_else(|| FederationError::new(ErrorCode::EndpointNotFound, "no known seed for the destination ring"))
        }
    }

    fn build_header(&self, target: &RouteTarget, message_id: u64, retry_timeout: Duration, expiration: Duration, expects_reply: bool) -> RoutingHeader {
        let this = self.table.this_node();
        RoutingHeader {
            from: this.instance,
            from_ring: this.ring_name,
            to: target.id,
            to_ring: target.ring.clone(),
            message_id,
            expiration_millis: expiration.as_millis() as u64,
            retry_timeout_millis: retry_timeout.as_millis() as u64,
            use_exact_routing: target.exact_instance,
            expects_reply,
        }
    }

    /// Fire-and-forget route: delivers `payload` to `target`, retrying
    /// hop selection until `overall_timeout` elapses. Never resolves with a
    /// reply payload.
    pub async fn begin_route(&self, payload: Bytes, target: RouteTarget, retry_timeout: Duration, overall_timeout: Duration) -> Result<()> {
        self.route_inner(payload, target, retry_timeout, overall_timeout, false).await?;
        Ok(())
    }

    /// Request-reply route: same hop-by-hop algorithm, but registers the
    /// message id with the `RequestTable` and waits for a correlated reply
    /// at each attempt.
    pub async fn route_request(&self, payload: Bytes, target: RouteTarget, retry_timeout: Duration, overall_timeout: Duration) -> Result<Bytes> {
        match self.route_inner(payload, target, retry_timeout, overall_timeout, true).await? {
            Some(reply) => Ok(reply),
            None => Err(FederationError::new(
                ErrorCode::InvalidConfiguration,
                "request-reply route resolved without a reply payload",
            )),
        }
    }

    async fn route_inner(&self, payload: Bytes, target: RouteTarget, retry_timeout: Duration, overall_timeout: Duration, expects_reply: bool) -> Result<Option<Bytes>> {
        let message_id = self.next_message_id();
        let deadline = Instant::now() + overall_timeout;
        let mut retry_count: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                if expects_reply {
                    self.request_table.cancel(message_id);
                }
                return Err(FederationError::new(ErrorCode::Timeout, "route did not complete within the overall timeout"));
            }

            let hop = self.select_hop(&target)?;
            match hop {
                Hop::Local => {
                    if target.exact_instance {
                        if let Some(expected) = target.instance_id {
                            let local_instance_id = self.table.this_node().instance.instance_id;
                            if expected != local_instance_id {
                                return Err(FederationError::new(
                                    ErrorCode::RoutingNodeDoesNotMatchFault,
                                    "exact_instance requested but local instance_id no longer matches",
                                ));
                            }
                        }
                    }
                    let header = self.build_header(&target, message_id, retry_timeout, remaining, expects_reply);
                    return self.local_handler.deliver(header, payload).await;
                }
                Hop::Remote(next) => {
                    let send_target = self.transport.resolve_target(next.physical_address).await?;
                    self.transport.send_one_way(&send_target, payload.clone()).await?;

                    if !expects_reply {
                        return Ok(None);
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let attempt_timeout = retry_timeout.min(remaining);
                    match self.request_table.await_reply(message_id, attempt_timeout).await {
                        Ok(reply) => return Ok(Some(reply)),
                        Err(err) if err.code() == ErrorCode::Timeout => {
                            retry_count += 1;
                            trace!(message_id, retry_count, "route attempt timed out, re-selecting hop");
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    /// Delivers a reply keyed by `message_id` to whoever is still awaiting
    /// it — called by the node's inbound Routing-actor handler when it
    /// sees a `RelatesToHeader`.
    pub fn complete_reply(&self, message_id: u64, payload: Bytes) {
        self.request_table.complete(message_id, payload);
    }

    /// Re-resolves `header.to`'s hop from this node's own ring view, for an
    /// inbound wire frame this node did not originate. Mirrors
    /// `select_hop`, the step every `route_inner` iteration performs, so an
    /// intermediate hop re-checks the same "do I own this, or does a known
    /// partner" decision the origin made.
    pub fn resolve_hop(&self, header: &RoutingHeader) -> Result<RouteHop> {
        let target = RouteTarget {
            id: header.to,
            instance_id: None,
            exact_instance: header.use_exact_routing,
            ring: header.to_ring.clone(),
        };
        match self.select_hop(&target)? {
            Hop::Local => Ok(RouteHop::Local),
            Hop::Remote(next) => Ok(RouteHop::Remote(next)),
        }
    }

    /// Hands an inbound frame this node owns to the local actor, without
    /// rebuilding the header the way `route_inner` does for a freshly
    /// originated route — the original sender's `from`/`message_id` must
    /// survive unchanged for reply correlation at the origin.
    pub async fn deliver_locally(&self, header: RoutingHeader, payload: Bytes) -> Result<Option<Bytes>> {
        self.local_handler.deliver(header, payload).await
    }

    /// Forwards an inbound frame, untouched, to `next` — used once
    /// `resolve_hop` says this node isn't the owner.
    pub async fn forward_raw(&self, next: &PartnerNode, raw_frame: Bytes) -> Result<()> {
        let send_target = self.transport.resolve_target(next.physical_address).await?;
        self.transport.send_one_way(&send_target, raw_frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use federation_ring::{NodeId, NodeInstance, NodeIdRange};
    use federation_table::{Phase, PartnerNode, RoutingTableConfig};
    use federation_transport::{ConnectionFaultHandler, SendTarget, SendTargetHandle};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Mutex;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    struct RecordingHandle {
        sent: Arc<Mutex<Vec<Bytes>>>,
    }

    #[async_trait]
    impl SendTargetHandle for RecordingHandle {
        async fn send_one_way(&self, payload: Bytes) -> Result<()> {
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }
        async fn begin_request(&self, _payload: Bytes, _timeout: Duration) -> Result<Bytes> {
            Ok(Bytes::new())
        }
    }

    struct RecordingTransport {
        sent: Arc<Mutex<Vec<Bytes>>>,
        local: SocketAddr,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn resolve_target(&self, address: SocketAddr) -> Result<SendTarget> {
            Ok(SendTarget::new(address, Arc::new(RecordingHandle { sent: self.sent.clone() })))
        }
        fn set_connection_fault_handler(&self, _handler: ConnectionFaultHandler) {}
        fn local_address(&self) -> SocketAddr {
            self.local
        }
    }

    struct EchoLocalHandler;

    #[async_trait]
    impl LocalDeliveryHandler for EchoLocalHandler {
        async fn deliver(&self, _header: RoutingHeader, payload: Bytes) -> Result<Option<Bytes>> {
            Ok(Some(payload))
        }
    }

    fn this_node_owning_everything() -> PartnerNode {
        let mut p = PartnerNode::new(NodeInstance::new(NodeId::new(1), 1), addr(9000), "ring0");
        p.phase = Phase::Routing;
        p.token.accept(NodeIdRange::Full, 1).unwrap();
        p
    }

    fn router_with(this_node: PartnerNode, transport: Arc<dyn Transport>) -> Router {
        let table = Arc::new(RoutingTable::new(this_node, RoutingTableConfig::default()));
        Router::new(
            table,
            transport,
            Arc::new(RequestTable::new()),
            Arc::new(SeedDirectory::new()),
            Arc::new(EchoLocalHandler),
        )
    }

    #[tokio::test]
    async fn local_delivery_when_target_falls_in_local_range() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(RecordingTransport { sent: sent.clone(), local: addr(9000) });
        let router = router_with(this_node_owning_everything(), transport);
        let reply = router
            .route_request(Bytes::from_static(b"hi"), RouteTarget::local(NodeId::new(42), "ring0"), Duration::from_millis(50), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, Bytes::from_static(b"hi"));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn forwards_to_the_closest_known_partner_when_not_local() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(RecordingTransport { sent: sent.clone(), local: addr(9000) });
        let mut this_node = PartnerNode::new(NodeInstance::new(NodeId::new(1), 1), addr(9000), "ring0");
        this_node.phase = Phase::Routing;
        this_node.token.accept(NodeIdRange::new(NodeId::new(0), NodeId::new(10)), 1).unwrap();
        let table = Arc::new(RoutingTable::new(this_node, RoutingTableConfig::default()));

        let mut partner = PartnerNode::new(NodeInstance::new(NodeId::new(100), 1), addr(9001), "ring0");
        partner.phase = Phase::Routing;
        table.add_or_update(partner).unwrap();

        let router = Router::new(table, transport, Arc::new(RequestTable::new()), Arc::new(SeedDirectory::new()), Arc::new(EchoLocalHandler));
        router
            .begin_route(Bytes::from_static(b"payload"), RouteTarget::local(NodeId::new(90), "ring0"), Duration::from_millis(50), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn route_request_times_out_when_nothing_ever_replies() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(RecordingTransport { sent, local: addr(9000) });
        let mut this_node = PartnerNode::new(NodeInstance::new(NodeId::new(1), 1), addr(9000), "ring0");
        this_node.phase = Phase::Routing;
        this_node.token.accept(NodeIdRange::new(NodeId::new(0), NodeId::new(10)), 1).unwrap();
        let table = Arc::new(RoutingTable::new(this_node, RoutingTableConfig::default()));
        let mut partner = PartnerNode::new(NodeInstance::new(NodeId::new(100), 1), addr(9001), "ring0");
        partner.phase = Phase::Routing;
        table.add_or_update(partner).unwrap();

        let router = Router::new(table, transport, Arc::new(RequestTable::new()), Arc::new(SeedDirectory::new()), Arc::new(EchoLocalHandler));
        let err = router
            .route_request(Bytes::from_static(b"payload"), RouteTarget::local(NodeId::new(90), "ring0"), Duration::from_millis(20), Duration::from_millis(60))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn exact_instance_mismatch_on_local_delivery_is_a_fault() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(RecordingTransport { sent, local: addr(9000) });
        let router = router_with(this_node_owning_everything(), transport);
        let target = RouteTarget {
            id: NodeId::new(42),
            instance_id: Some(999),
            exact_instance: true,
            ring: "ring0".to_string(),
        };
        let err = router
            .route_request(Bytes::from_static(b"hi"), target, Duration::from_millis(50), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RoutingNodeDoesNotMatchFault);
    }
}
