//! Monitor-side driver for arbitration (spec §4.6): fans an
//! `ArbitrationRequest` out to the configured voter quorum and folds
//! whatever replies arrive in time through `aggregate_reject`. Grounded on
//! the same request/reply shape `federation-routing::Router::route_request`
//! already uses for a routed round trip, adapted here to a direct
//! point-to-point fan-out rather than ring routing, since every voter's
//! address is already known from `FederationConfig::votes`.

use crate::node::FederationNode;
use crate::wire::{decode_body, encode, Envelope};
use federation_core::Result;
use federation_membership::{aggregate_reject, ArbitrationReply, ArbitrationRequest, ArbitrationType};
use federation_ring::NodeId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Asks the configured voter quorum to arbitrate a suspected lease failure
/// of `subject`, observed by this node acting as monitor. Returns the
/// aggregated reject/neutral verdict once every reachable voter has
/// answered or `node.context.config.message_timeout` elapses, whichever
/// comes first — a voter that never replies simply doesn't contribute a
/// vote, the same "missing vote doesn't block the round" tolerance
/// `aggregate_reject`'s quorum math already assumes.
pub async fn run_arbitration(
    node: &Arc<FederationNode>,
    subject: NodeId,
    monitor_lease_instance: u64,
    subject_lease_instance: u64,
    subject_ttl: Duration,
    history_needed: Duration,
    kind: ArbitrationType,
) -> Result<bool> {
    let this = node.table.this_node();
    let request = ArbitrationRequest {
        monitor: this.id(),
        subject,
        monitor_lease_instance,
        subject_lease_instance,
        subject_ttl,
        history_needed,
        kind,
    };

    let voters: Vec<std::net::SocketAddr> = node
        .context
        .config
        .votes
        .iter()
        .filter_map(|voter| match voter.connection_string.parse() {
            Ok(addr) => Some(addr),
            Err(err) => {
                warn!(voter = %voter.id, %err, "skipping voter with an unparseable connection string");
                None
            }
        })
        .collect();

    let mut join_set = tokio::task::JoinSet::new();
    for addr in voters {
        let node = node.clone();
        let request = request.clone();
        join_set.spawn(async move { send_and_await(&node, addr, request).await });
    }

    let mut replies: Vec<ArbitrationReply> = Vec::new();
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(reply)) => replies.push(reply),
            Ok(Err(err)) => debug!(%err, "a voter did not answer this arbitration round"),
            Err(err) => warn!(%err, "arbitration voter task panicked"),
        }
    }

    Ok(aggregate_reject(kind, &replies))
}

async fn send_and_await(node: &Arc<FederationNode>, addr: std::net::SocketAddr, request: ArbitrationRequest) -> Result<ArbitrationReply> {
    let message_id = node.next_message_id();
    let envelope = Envelope::ArbitrationRequest { from: node.this_instance(), message_id, body: request };
    let target = node.transport.resolve_target(addr).await?;
    node.transport.send_one_way(&target, encode(&envelope)?).await?;
    let reply = node.request_table.await_reply(message_id, node.context.config.message_timeout).await?;
    decode_body(&reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use federation_core::config::{VoterConfig, VoterKind};
    use federation_core::{CoreContext, FederationConfig};
    use federation_dissemination::MulticastLocalHandler;
    use federation_ring::NodeInstance;
    use federation_table::{Phase, PartnerNode};
    use federation_transport::{ConnectionFaultHandler, SendTarget, SendTargetHandle, Transport};
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
    impl Transport for NoopTransport {
        async fn resolve_target(&self, address: SocketAddr) -> Result<SendTarget> {
            Ok(SendTarget::new(address, Arc::new(NoopHandle)))
        }
        fn set_connection_fault_handler(&self, _handler: ConnectionFaultHandler) {}
        fn local_address(&self) -> SocketAddr {
            addr(0)
        }
    }

    struct NoopMulticastHandler;
    #[async_trait]
    impl MulticastLocalHandler for NoopMulticastHandler {
        async fn deliver(&self, _target: NodeInstance, _payload: Bytes) -> Result<Option<Bytes>> {
            Ok(None)
        }
    }

    fn node_with_no_reachable_voters() -> Arc<FederationNode> {
        let mut config = FederationConfig::default();
        config.votes.push(VoterConfig {
            id: "seed-1".into(),
            kind: VoterKind::SeedNode,
            connection_string: "127.0.0.1:9100".into(),
            ring_name: None,
        });
        let context = CoreContext::new(config.clone());
        let this_node = PartnerNode::new(NodeInstance::new(NodeId::new(1), 1), addr(9000), "ring0");
        FederationNode::new(config, context, this_node, Arc::new(NoopTransport), Arc::new(NoopMulticastHandler))
    }

    #[tokio::test]
    async fn one_way_arbitration_rejects_unilaterally_even_with_no_replies() {
        let node = node_with_no_reachable_voters();
        let verdict = run_arbitration(&node, NodeId::new(2), 1, 1, Duration::from_secs(5), Duration::from_secs(30), ArbitrationType::OneWay)
            .await
            .unwrap();
        assert!(verdict);
    }

    #[tokio::test]
    async fn two_way_simple_with_no_replies_stays_neutral() {
        let node = node_with_no_reachable_voters();
        let result = tokio::time::timeout(
            Duration::from_millis(200),
            run_arbitration(&node, NodeId::new(2), 1, 1, Duration::from_secs(5), Duration::from_secs(30), ArbitrationType::TwoWaySimple),
        )
        .await;
        // the voter never replies, so this would normally wait out the full
        // `message_timeout`; confirming it doesn't resolve instantly is
        // enough to show the quorum wait is real rather than skipped.
        assert!(result.is_err(), "expected the arbitration round to still be waiting on its timeout");
    }
}
