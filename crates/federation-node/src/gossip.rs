//! Background loops a running node drives on its own clock: routing-table
//! compaction, the global-time leader's periodic epoch narrowing through
//! the voter store's read-modify-write path (spec §4.12), neighborhood
//! ping probes (spec §4.5), and ring-wide update gossip (spec §4.11). Each
//! loop exits as soon as `context.shutdown` is triggered, the way the
//! teacher's own long-running tasks select against a shutdown watch
//! channel rather than polling an `AtomicBool`.

use crate::wire::{decode_body, encode, Envelope, UpdateRequestBody};
use crate::node::FederationNode;
use federation_gossip::UpdateReply;
use federation_membership::PingRequestBody;
use federation_ring::{NodeId, NodeIdRange};
use federation_table::PartnerNode;
use federation_voterstore::StoreValue;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::interval;
use tracing::{debug, warn};

const GLOBAL_TIME_EPOCH_KEY: &str = "federation/global-time-epoch";

/// Bumps the shared epoch whenever this node is the global-time leader and
/// its local uncertainty interval has widened past tolerance. Collapses
/// `GenerateValue`/`OnUpdateCompleted` (spec §4.12) into one
/// `read_modify_write` call: the closure is `generate_epoch`, and a
/// successful commit is fed straight back into `apply_new_epoch`.
pub fn spawn_global_time_epoch_task(node: Arc<FederationNode>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let request_ids = AtomicU64::new(1);
        let mut ticker = interval(node.context.config.global_time_trace_interval);
        loop {
            tokio::select! {
                _ = node.context.shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            if !node.global_time.due_for_epoch_update() {
                continue;
            }
            node.global_time.begin_epoch_update();
            let result = node.voter_store.read_modify_write(
                GLOBAL_TIME_EPOCH_KEY,
                |current| {
                    let stored = current.and_then(StoreValue::as_sequence).unwrap_or(0);
                    StoreValue::Sequence(node.global_time.generate_epoch(stored))
                },
                5,
                || request_ids.fetch_add(1, Ordering::Relaxed),
            );
            match result {
                Ok((value, _sequence)) => {
                    if let Some(new_epoch) = value.as_sequence() {
                        if new_epoch > 0 {
                            node.global_time.apply_new_epoch(new_epoch as u64);
                        }
                    }
                }
                Err(err) => {
                    debug!(%err, "global time epoch update did not commit this round");
                }
            }
        }
    })
}

/// Evicts stale routing-table entries once the table has grown past
/// `routing_table_capacity` (spec §4.2), on the node's own configured
/// cadence rather than inline with every `add_or_update`.
pub fn spawn_routing_table_compaction_task(node: Arc<FederationNode>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(node.context.config.routing_table_compact_interval);
        loop {
            tokio::select! {
                _ = node.context.shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            node.table.compact();
        }
    })
}

/// Sweeps `unknown_nodes` for probes that never got a reply, elevating
/// them so a subsequent ping round escalates to arbitration (spec §4.5).
pub fn spawn_unknown_node_sweep_task(node: Arc<FederationNode>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(node.context.config.ping_interval);
        loop {
            tokio::select! {
                _ = node.context.shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            let expired = node.unknown_nodes.sweep_expired();
            if !expired.is_empty() {
                warn!(count = expired.len(), "unknown node probes expired without a reply");
            }
        }
    })
}

/// Pings `pred_hood_edge`/`succ_hood_edge` plus the immediate pred/succ on
/// `PingInterval` (spec §4.5). A reply's `partner_ids` that aren't already
/// in the routing table are handed to `unknown_nodes` for a future direct
/// probe rather than inserted outright — a bare id carries no address to
/// reach it at.
pub fn spawn_hood_ping_task(node: Arc<FederationNode>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(node.context.config.ping_interval);
        loop {
            tokio::select! {
                _ = node.context.shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            for target in ping_targets(&node) {
                let node = node.clone();
                tokio::spawn(async move {
                    if let Err(err) = ping_once(&node, &target).await {
                        debug!(target = %target.id(), %err, "ping round did not complete");
                    }
                });
            }
        }
    })
}

fn ping_targets(node: &Arc<FederationNode>) -> Vec<PartnerNode> {
    let this_id = node.table.this_node_id();
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut targets = Vec::new();
    let mut push = |candidate: Option<PartnerNode>| {
        if let Some(p) = candidate {
            if p.id() != this_id && seen.insert(p.id()) {
                targets.push(p);
            }
        }
    };
    let hood = node.table.neighborhood();
    push(hood.first().cloned());
    push(hood.last().cloned());
    push(node.table.predecessor_of(this_id));
    push(node.table.successor_of(this_id));
    targets
}

/// Drives `UpdateManager`'s alternation between exponential targets and
/// gap-filling on `UpdateInterval` (spec §4.11). A gossip target is a ring
/// id, not necessarily a known peer's address; this node reaches it through
/// whichever known partner is closest by ring distance, the same "route
/// towards, don't require an exact match" approach `federation-routing`
/// uses for multi-hop delivery, simplified here to a single direct hop
/// rather than a full routed round trip.
pub fn spawn_update_manager_task(node: Arc<FederationNode>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(node.context.config.update_interval);
        loop {
            tokio::select! {
                _ = node.context.shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            let Some((target_id, is_exponential_target)) = node.update_manager.next_target() else {
                continue;
            };
            let Some(peer) = nearest_known_peer(&node, target_id) else {
                debug!(target = %target_id, "no known partner to reach this gossip target through yet");
                continue;
            };
            if let Err(err) = update_once(&node, &peer, is_exponential_target).await {
                debug!(target = %peer.id(), %err, "update gossip round did not complete");
            }
        }
    })
}

fn nearest_known_peer(node: &Arc<FederationNode>, target_id: NodeId) -> Option<PartnerNode> {
    node.table
        .lookup(target_id)
        .or_else(|| node.table.predecessor_of(target_id))
        .or_else(|| node.table.successor_of(target_id))
}

async fn update_once(node: &Arc<FederationNode>, target: &PartnerNode, is_exponential_target: bool) -> federation_core::Result<()> {
    let message_id = node.next_message_id();
    let this = node.table.this_node();
    let body = UpdateRequestBody { is_exponential_target, range: node.update_manager.outstanding_gap().unwrap_or(NodeIdRange::Full) };
    let envelope = Envelope::UpdateRequest { from: this.instance, message_id, body };
    let send_target = node.transport.resolve_target(target.physical_address).await?;
    node.transport.send_one_way(&send_target, encode(&envelope)?).await?;

    let reply = node.request_table.await_reply(message_id, node.context.config.message_timeout).await?;
    let reply: UpdateReply = decode_body(&reply)?;
    node.update_manager.integrate_reply(&reply);
    Ok(())
}

async fn ping_once(node: &Arc<FederationNode>, target: &PartnerNode) -> federation_core::Result<()> {
    let message_id = node.next_message_id();
    let this = node.table.this_node();
    let body = PingRequestBody {
        sender_instance: this.instance,
        sender_hood_range: this.token.range(),
    };
    let envelope = Envelope::PingRequest { from: this.instance, message_id, body };
    let send_target = node.transport.resolve_target(target.physical_address).await?;
    node.transport.send_one_way(&send_target, encode(&envelope)?).await?;

    let reply = node.request_table.await_reply(message_id, node.context.config.message_timeout).await?;
    let reply: federation_membership::PingReplyBody = decode_body(&reply)?;
    for id in reply.partner_ids {
        if node.table.lookup(id).is_none() && node.unknown_nodes.observe(id) {
            debug!(%id, via = %target.id(), "discovered a previously unknown node through a ping reply");
        }
    }
    node.unknown_nodes.elevate(target.id());
    Ok(())
}
