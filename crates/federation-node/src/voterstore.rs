//! Cross-node driver for the voter store's bootstrap and replication wire
//! protocol (spec §4.7): the Introduce/ConfigQuery/Bootstrap race that
//! elects a first primary, the primary's per-write `Sync` push to its
//! secondaries, and the `Progress` fan-out a secondary runs on suspected
//! primary failure. `federation_voterstore::VoterStore` holds no transport
//! of its own ("membership transitions, quorum acknowledgement, and
//! retries are driven by the caller"); this module is that caller, the
//! same division `arbitrate.rs` draws between `ArbitrationTable`'s local
//! decision and the quorum fan-out around it.

use crate::node::FederationNode;
use crate::wire::{
    replica_set_from_snapshot, BootstrapReplyBody, BootstrapRequestBody, ConfigQueryReplyBody, Envelope, IntroduceReplyBody, IntroduceRequestBody,
    ProgressReplyBody, ProgressRequestBody, SyncReplyBody, SyncRequestBody,
};
use federation_core::error::ErrorCode;
use federation_core::{FederationError, Result};
use federation_ring::NodeInstance;
use federation_voterstore::{ReplicaPhase, StoreValue, WriteOutcome};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

fn voter_addresses(node: &Arc<FederationNode>) -> Vec<SocketAddr> {
    node.context
        .config
        .votes
        .iter()
        .filter_map(|voter| voter.connection_string.parse().ok())
        .collect()
}

/// Runs one attempt at the bootstrap sequence. A caller drives this
/// repeatedly via `spawn_voterstore_bootstrap_task` until phase settles on
/// `Primary` or `Secondary`; a single attempt that finds nothing simply
/// returns so the next tick retries.
pub async fn run_bootstrap(node: &Arc<FederationNode>) -> Result<()> {
    if matches!(node.voter_store.phase(), ReplicaPhase::Primary | ReplicaPhase::Secondary) {
        return Ok(());
    }

    introduce_round(node).await;

    if try_join_existing_primary(node).await? {
        return Ok(());
    }

    run_bootstrap_race(node).await
}

/// Bootstrap's Introduce phase (spec §4.7): announces this voter to every
/// other configured voter and folds down-voter knowledge both ways. The
/// round doesn't gate on a reply count itself; whether a primary already
/// exists is resolved next, by `try_join_existing_primary`.
async fn introduce_round(node: &Arc<FederationNode>) {
    let addrs = voter_addresses(node);
    let mut join_set = tokio::task::JoinSet::new();
    for addr in addrs {
        let node = node.clone();
        join_set.spawn(async move { send_introduce(&node, addr).await });
    }
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(reply)) => node.voter_store.merge_down_voters(&reply.down_voters),
            Ok(Err(err)) => debug!(%err, "a voter did not answer an introduce round"),
            Err(err) => debug!(%err, "introduce voter task panicked"),
        }
    }
}

async fn send_introduce(node: &Arc<FederationNode>, addr: SocketAddr) -> Result<IntroduceReplyBody> {
    let message_id = node.next_message_id();
    let body = IntroduceRequestBody { down_voters: node.voter_store.down_voters() };
    let envelope = Envelope::IntroduceRequest { from: node.this_instance(), message_id, body };
    let target = node.transport.resolve_target(addr).await?;
    node.transport.send_one_way(&target, crate::wire::encode(&envelope)?).await?;
    let reply = node.request_table.await_reply(message_id, node.context.config.message_timeout).await?;
    crate::wire::decode_body(&reply)
}

/// Queries every configured voter for a replica set (spec §4.7's
/// ConfigQuery/BecomeSecondary). The first reply reporting a primary is
/// adopted directly, collapsing the spec's separate ConfigQuery/Join/Sync
/// messages into one round trip, the way
/// `VoterStore::accept_secondary_bootstrap` already collapses its own
/// copy-then-catch-up sequence into a single call.
async fn try_join_existing_primary(node: &Arc<FederationNode>) -> Result<bool> {
    let addrs = voter_addresses(node);
    let mut join_set = tokio::task::JoinSet::new();
    for addr in addrs {
        let node = node.clone();
        join_set.spawn(async move { send_config_query(&node, addr).await });
    }
    let mut joined = false;
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(reply)) if reply.has_primary && !joined => {
                let replica_set = replica_set_from_snapshot(&reply.replica_set);
                match node.voter_store.accept_secondary_bootstrap(replica_set, reply.entries, reply.highest_sequence) {
                    Ok(()) => joined = true,
                    Err(err) => debug!(%err, "declined a stale replica-set snapshot"),
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!(%err, "a voter did not answer a config query"),
            Err(err) => debug!(%err, "config query voter task panicked"),
        }
    }
    Ok(joined)
}

async fn send_config_query(node: &Arc<FederationNode>, addr: SocketAddr) -> Result<ConfigQueryReplyBody> {
    let message_id = node.next_message_id();
    let envelope = Envelope::ConfigQueryRequest { from: node.this_instance(), message_id };
    let target = node.transport.resolve_target(addr).await?;
    node.transport.send_one_way(&target, crate::wire::encode(&envelope)?).await?;
    let reply = node.request_table.await_reply(message_id, node.context.config.message_timeout).await?;
    crate::wire::decode_body(&reply)
}

/// The bootstrap race itself (spec §4.7): generates a fresh
/// `leader_instance` tick, asks every voter to accept it, and becomes
/// primary on a strict majority of ACCEPTs. A loser simply returns and lets
/// the next `run_bootstrap` attempt retry with a fresh tick.
async fn run_bootstrap_race(node: &Arc<FederationNode>) -> Result<()> {
    let addrs = voter_addresses(node);
    let leader_instance = node.context.clock.tick();
    let mut join_set = tokio::task::JoinSet::new();
    for addr in addrs.iter().copied() {
        let node = node.clone();
        join_set.spawn(async move { send_bootstrap(&node, addr, leader_instance).await });
    }
    let mut accepted = 0usize;
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(reply)) if reply.accepted => accepted += 1,
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!(%err, "a voter did not answer the bootstrap race"),
            Err(err) => debug!(%err, "bootstrap voter task panicked"),
        }
    }
    // with no other voters configured, this node is unilaterally its own majority
    if accepted * 2 > addrs.len() || addrs.is_empty() {
        node.voter_store.bootstrap_as_primary(leader_instance, Instant::now());
    }
    Ok(())
}

async fn send_bootstrap(node: &Arc<FederationNode>, addr: SocketAddr, leader_instance: u64) -> Result<BootstrapReplyBody> {
    let message_id = node.next_message_id();
    let body = BootstrapRequestBody { leader_instance };
    let envelope = Envelope::BootstrapRequest { from: node.this_instance(), message_id, body };
    let target = node.transport.resolve_target(addr).await?;
    node.transport.send_one_way(&target, crate::wire::encode(&envelope)?).await?;
    let reply = node.request_table.await_reply(message_id, node.context.config.message_timeout).await?;
    crate::wire::decode_body(&reply)
}

/// Primary-side write path that actually replicates (spec §4.7's
/// steady-state write): starts the write locally, and if it landed
/// `Queued` — a quorum of live secondaries to wait on — pushes a
/// `SyncRequest` to each of them and folds their acks back in. Call this
/// instead of `node.voter_store.write` directly whenever a write needs to
/// actually reach the replica set rather than just the local copy.
///
/// A secondary that acked a write which let other queued writes on the
/// same key drain is not separately notified here; draining and replying
/// to those callers is left to whatever already holds their request
/// handles, the same caller-owns-retries boundary `VoterStore` documents
/// for itself.
pub async fn write_and_sync(node: &Arc<FederationNode>, key: &str, value: StoreValue, check_sequence: Option<i64>, request_id: u64) -> Result<WriteOutcome> {
    let outcome = node.voter_store.write(key, value.clone(), check_sequence, request_id)?;
    if !matches!(outcome, WriteOutcome::Queued) {
        return Ok(outcome);
    }
    let (_current, sequence) = node.voter_store.read(key)?;
    let targets: Vec<NodeInstance> = node
        .voter_store
        .replica_set_snapshot()
        .secondaries()
        .iter()
        .filter(|r| !r.is_down)
        .map(|r| r.instance)
        .collect();

    let mut join_set = tokio::task::JoinSet::new();
    for target in targets {
        let node = node.clone();
        let key = key.to_string();
        let value = value.clone();
        join_set.spawn(async move { send_sync(&node, target, key, value, sequence).await });
    }
    let mut committed = None;
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok((replica, acked_sequence))) => {
                if let Some(outcome) = node.voter_store.ack_secondary(key, replica, acked_sequence) {
                    committed = Some(outcome);
                }
            }
            Ok(Err(err)) => debug!(%err, "a secondary did not ack this write round"),
            Err(err) => debug!(%err, "sync voter task panicked"),
        }
    }
    node.voter_store.drain_queue(key);
    committed.ok_or_else(|| FederationError::from_code(ErrorCode::Timeout))
}

async fn send_sync(node: &Arc<FederationNode>, target: NodeInstance, key: String, value: StoreValue, sequence: i64) -> Result<(NodeInstance, i64)> {
    let addr = node
        .table
        .lookup(target.id)
        .map(|p| p.physical_address)
        .ok_or_else(|| FederationError::new(ErrorCode::EndpointNotFound, "secondary replica has no known address"))?;
    let message_id = node.next_message_id();
    let body = SyncRequestBody { key, value, sequence };
    let envelope = Envelope::SyncRequest { from: node.this_instance(), message_id, body };
    let send_target = node.transport.resolve_target(addr).await?;
    node.transport.send_one_way(&send_target, crate::wire::encode(&envelope)?).await?;
    let reply = node.request_table.await_reply(message_id, node.context.config.message_timeout).await?;
    let reply: SyncReplyBody = crate::wire::decode_body(&reply)?;
    Ok((target, reply.acked_sequence))
}

/// Primary failover (spec §4.7): a secondary that suspects the primary is
/// down fans a `ProgressRequest` out to every other replica, adopts the
/// highest sequence any of them report, marks whichever didn't answer in
/// time as down, and promotes itself. `local_index` must be this
/// candidate's position among the surviving replicas, per
/// `VoterStore::promote_to_primary`'s own epoch-bumping contract.
pub async fn run_failover(node: &Arc<FederationNode>, local_index: u64) -> Result<()> {
    let replica_set = node.voter_store.replica_set_snapshot();
    let self_id = node.table.this_node_id();
    let peers: Vec<NodeInstance> = replica_set.replicas.iter().filter(|r| r.instance.id != self_id).map(|r| r.instance).collect();

    let mut join_set = tokio::task::JoinSet::new();
    for peer in peers.iter().copied() {
        let node = node.clone();
        join_set.spawn(async move { send_progress(&node, peer).await });
    }
    let mut progress = Vec::new();
    let mut responded = HashSet::new();
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok((peer, sequence))) => {
                progress.push((peer, sequence));
                responded.insert(peer);
            }
            Ok(Err(err)) => debug!(%err, "a replica did not answer the failover progress round"),
            Err(err) => debug!(%err, "progress voter task panicked"),
        }
    }
    let down: Vec<NodeInstance> = peers.into_iter().filter(|p| !responded.contains(p)).collect();
    for instance in &down {
        node.voter_store.mark_down(*instance);
    }
    node.voter_store.promote_to_primary(local_index, &progress, &down)
}

async fn send_progress(node: &Arc<FederationNode>, peer: NodeInstance) -> Result<(NodeInstance, i64)> {
    let addr = node
        .table
        .lookup(peer.id)
        .map(|p| p.physical_address)
        .ok_or_else(|| FederationError::new(ErrorCode::EndpointNotFound, "replica has no known address"))?;
    let message_id = node.next_message_id();
    let leader_instance = node.context.clock.tick();
    let envelope = Envelope::ProgressRequest {
        from: node.this_instance(),
        message_id,
        body: ProgressRequestBody { leader_instance },
    };
    let target = node.transport.resolve_target(addr).await?;
    node.transport.send_one_way(&target, crate::wire::encode(&envelope)?).await?;
    let reply = node.request_table.await_reply(message_id, node.context.config.message_timeout).await?;
    let reply: ProgressReplyBody = crate::wire::decode_body(&reply)?;
    Ok((peer, reply.sequence))
}

/// Drives `run_bootstrap` on `voter_store_retry_interval` until this node
/// settles as `Primary` or `Secondary`, then idles at
/// `voter_store_liveness_check_interval`, matching the bootstrap-vs-steady-
/// state cadence split spec §4.7 and `FederationConfig` both name.
pub fn spawn_voterstore_bootstrap_task(node: Arc<FederationNode>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let settled = matches!(node.voter_store.phase(), ReplicaPhase::Primary | ReplicaPhase::Secondary);
            let wait = if settled {
                node.context.config.voter_store_liveness_check_interval
            } else {
                node.context.config.voter_store_retry_interval
            };
            tokio::select! {
                _ = node.context.shutdown.wait() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            if settled {
                continue;
            }
            if let Err(err) = run_bootstrap(&node).await {
                debug!(%err, "voter store bootstrap attempt did not complete");
            }
        }
    })
}
