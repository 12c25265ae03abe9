//! The envelope every inbound TCP frame decodes into, and the
//! `InboundHandler` that routes each variant to whichever component owns
//! it. Grounded on `federation_transport::headers`'s own doc comment
//! ("`FederationMessage` decides which headers are present on a given
//! message") — this is that decision, made concrete for this node.
//!
//! Reply correlation for a routed request is resolved directly with the
//! physical peer the request arrived from rather than by routing the reply
//! back hop-by-hop; multi-hop reply routing is an open item (see
//! `DESIGN.md`), the same scope boundary `federation_dissemination::Multicast`
//! already draws around its own wire reply.

use crate::node::FederationNode;
use async_trait::async_trait;
use bytes::Bytes;
use federation_core::error::ErrorCode;
use federation_core::{FederationError, Result};
use federation_gossip::UpdateReply;
use federation_membership::{ArbitrationFlags, ArbitrationReply, ArbitrationRequest, PingReplyBody, PingRequestBody};
use federation_ring::{NodeId, NodeIdRange, NodeInstance};
use federation_routing::RouteHop;
use federation_transport::headers::{BroadcastHeader, BroadcastRangeHeader, BroadcastStepHeader, GlobalTimeExchangeHeader, PToPHeader, RoutingHeader};
use federation_transport_tcp::InboundHandler;
use federation_voterstore::{accepts_bootstrap_request, StoreValue};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Envelope {
    PToP { header: PToPHeader, payload: Vec<u8> },
    RoutingRequest { header: RoutingHeader, payload: Vec<u8> },
    RoutingReply { message_id: u64, payload: Vec<u8>, global_time: GlobalTimeExchangeHeader },
    UnreliableBroadcast { broadcast_id: u64, step: BroadcastStepHeader, payload: Vec<u8> },
    ReliableBroadcastRange { header: BroadcastHeader, range: BroadcastRangeHeader, payload: Vec<u8> },
    PingRequest { from: NodeInstance, message_id: u64, body: PingRequestBody },
    PingReply { message_id: u64, body: PingReplyBody },
    ArbitrationRequest { from: NodeInstance, message_id: u64, body: ArbitrationRequest },
    ArbitrationReply { message_id: u64, body: ArbitrationReply },
    UpdateRequest { from: NodeInstance, message_id: u64, body: UpdateRequestBody },
    UpdateReply { message_id: u64, body: UpdateReply },
    IntroduceRequest { from: NodeInstance, message_id: u64, body: IntroduceRequestBody },
    IntroduceReply { message_id: u64, body: IntroduceReplyBody },
    ConfigQueryRequest { from: NodeInstance, message_id: u64 },
    ConfigQueryReply { message_id: u64, body: ConfigQueryReplyBody },
    BootstrapRequest { from: NodeInstance, message_id: u64, body: BootstrapRequestBody },
    BootstrapReply { message_id: u64, body: BootstrapReplyBody },
    SyncRequest { from: NodeInstance, message_id: u64, body: SyncRequestBody },
    SyncReply { message_id: u64, body: SyncReplyBody },
    ProgressRequest { from: NodeInstance, message_id: u64, body: ProgressRequestBody },
    ProgressReply { message_id: u64, body: ProgressReplyBody },
}

/// Wire-level stand-in for `federation_gossip::UpdateRequest`: that type
/// carries an `Instant` for local round-trip tracking that has no business
/// crossing the wire, so only the two fields a receiver actually needs are
/// sent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateRequestBody {
    pub is_exponential_target: bool,
    pub range: NodeIdRange,
}

/// Wire-safe view of a single `federation_voterstore::Replica`: drops
/// `last_contact`, an `Instant` that can't cross the wire and that a
/// receiver reconstructs locally (spec §4.7).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaSnapshot {
    pub instance: NodeInstance,
    pub is_down: bool,
    pub sequence: i64,
}

/// Wire-safe view of a `federation_voterstore::ReplicaSet`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaSetSnapshot {
    pub generation: u64,
    pub epoch: u64,
    pub replicas: Vec<ReplicaSnapshot>,
}

pub(crate) fn snapshot_replica_set(set: &federation_voterstore::ReplicaSet) -> ReplicaSetSnapshot {
    ReplicaSetSnapshot {
        generation: set.generation,
        epoch: set.epoch,
        replicas: set
            .replicas
            .iter()
            .map(|r| ReplicaSnapshot { instance: r.instance, is_down: r.is_down, sequence: r.sequence })
            .collect(),
    }
}

pub(crate) fn replica_set_from_snapshot(snapshot: &ReplicaSetSnapshot) -> federation_voterstore::ReplicaSet {
    let now = Instant::now();
    federation_voterstore::ReplicaSet {
        generation: snapshot.generation,
        epoch: snapshot.epoch,
        replicas: snapshot
            .replicas
            .iter()
            .map(|r| {
                let mut replica = federation_voterstore::Replica::new(r.instance, now);
                replica.is_down = r.is_down;
                replica.sequence = r.sequence;
                replica
            })
            .collect(),
    }
}

/// Bootstrap's Introduce phase (spec §4.7): a voter announces itself and
/// shares down-voter knowledge with every other configured voter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntroduceRequestBody {
    pub down_voters: Vec<NodeId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntroduceReplyBody {
    pub global_time_known: bool,
    pub down_voters: Vec<NodeId>,
}

/// Reply to a `ConfigQueryRequest`: when the responder is the current
/// primary, this doubles as admission and catch-up in one round trip
/// (collapsing the spec's separate Join/Sync-for-bootstrap messages, the
/// same way `VoterStore::accept_secondary_bootstrap` already collapses its
/// own copy-then-catch-up sequence into one call).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigQueryReplyBody {
    pub has_primary: bool,
    pub replica_set: ReplicaSetSnapshot,
    pub entries: Vec<(String, StoreValue, i64)>,
    pub highest_sequence: i64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BootstrapRequestBody {
    pub leader_instance: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BootstrapReplyBody {
    pub accepted: bool,
}

/// A primary's per-write push to one secondary (spec §4.7's steady-state
/// Sync, narrowed to a single key/value/sequence rather than the
/// original's batched start/end sequence range).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncRequestBody {
    pub key: String,
    pub value: StoreValue,
    pub sequence: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncReplyBody {
    pub key: String,
    pub acked_sequence: i64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ProgressRequestBody {
    pub leader_instance: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ProgressReplyBody {
    pub sequence: i64,
}

pub fn encode(envelope: &Envelope) -> Result<Bytes> {
    serde_json::to_vec(envelope)
        .map(Bytes::from)
        .map_err(|err| FederationError::new(ErrorCode::InvalidArgument, format!("failed to encode envelope: {err}")))
}

fn decode(payload: &[u8]) -> Result<Envelope> {
    serde_json::from_slice(payload).map_err(|err| FederationError::new(ErrorCode::InvalidArgument, format!("failed to decode envelope: {err}")))
}

/// Serializes a reply body into the bytes `RequestTable::complete` hands
/// back to the waiter, so a typed round trip (`Ping`, `Arbitration`) can
/// ride the same untyped `Bytes` channel `Router` uses for routed replies.
pub(crate) fn encode_body<T: Serialize>(body: &T) -> Result<Bytes> {
    serde_json::to_vec(body)
        .map(Bytes::from)
        .map_err(|err| FederationError::new(ErrorCode::InvalidArgument, format!("failed to encode reply body: {err}")))
}

pub(crate) fn decode_body<T: for<'de> Deserialize<'de>>(payload: &Bytes) -> Result<T> {
    serde_json::from_slice(payload).map_err(|err| FederationError::new(ErrorCode::InvalidArgument, format!("failed to decode reply body: {err}")))
}

/// Bridges `federation_transport_tcp`'s raw-frame callback into every
/// component a decoded `Envelope` might belong to.
pub struct NodeInboundHandler {
    node: Arc<FederationNode>,
    accepted_bootstrap_candidate: std::sync::Mutex<Option<NodeId>>,
}

impl NodeInboundHandler {
    pub fn new(node: Arc<FederationNode>) -> Self {
        Self {
            node,
            accepted_bootstrap_candidate: std::sync::Mutex::new(None),
        }
    }

    async fn handle(&self, from_addr: SocketAddr, envelope: Envelope) -> Result<()> {
        match envelope {
            Envelope::PToP { header, payload } => {
                self.node.dispatcher.dispatch(header, Bytes::from(payload)).await?;
            }
            Envelope::RoutingRequest { header, payload } => {
                self.handle_routing_request(from_addr, header, Bytes::from(payload)).await?;
            }
            Envelope::RoutingReply { message_id, payload, global_time } => {
                self.node.global_time.absorb_exchange_header(&global_time);
                self.node.router.complete_reply(message_id, Bytes::from(payload));
            }
            Envelope::UnreliableBroadcast { broadcast_id, step, payload } => {
                self.node.unreliable_broadcast.on_received(broadcast_id, step, Bytes::from(payload)).await?;
            }
            Envelope::ReliableBroadcastRange { header: _, range, payload } => {
                self.node.reliable_broadcast.on_received_range(Bytes::from(payload), range.range).await?;
            }
            Envelope::PingRequest { from, message_id, body } => {
                self.handle_ping_request(from_addr, from, message_id, body).await?;
            }
            Envelope::PingReply { message_id, body } => {
                self.node.request_table.complete(message_id, encode_body(&body)?);
            }
            Envelope::ArbitrationRequest { from, message_id, body } => {
                self.handle_arbitration_request(from_addr, from, message_id, body).await?;
            }
            Envelope::ArbitrationReply { message_id, body } => {
                self.node.request_table.complete(message_id, encode_body(&body)?);
            }
            Envelope::UpdateRequest { from, message_id, body } => {
                self.handle_update_request(from_addr, from, message_id, body).await?;
            }
            Envelope::UpdateReply { message_id, body } => {
                self.node.request_table.complete(message_id, encode_body(&body)?);
            }
            Envelope::IntroduceRequest { from, message_id, body } => {
                self.handle_introduce_request(from_addr, from, message_id, body).await?;
            }
            Envelope::IntroduceReply { message_id, body } => {
                self.node.request_table.complete(message_id, encode_body(&body)?);
            }
            Envelope::ConfigQueryRequest { from, message_id } => {
                self.handle_config_query_request(from_addr, from, message_id).await?;
            }
            Envelope::ConfigQueryReply { message_id, body } => {
                self.node.request_table.complete(message_id, encode_body(&body)?);
            }
            Envelope::BootstrapRequest { from, message_id, body } => {
                self.handle_bootstrap_request(from_addr, from, message_id, body).await?;
            }
            Envelope::BootstrapReply { message_id, body } => {
                self.node.request_table.complete(message_id, encode_body(&body)?);
            }
            Envelope::SyncRequest { from, message_id, body } => {
                self.handle_sync_request(from_addr, from, message_id, body).await?;
            }
            Envelope::SyncReply { message_id, body } => {
                self.node.request_table.complete(message_id, encode_body(&body)?);
            }
            Envelope::ProgressRequest { from, message_id, body } => {
                self.handle_progress_request(from_addr, from, message_id, body).await?;
            }
            Envelope::ProgressReply { message_id, body } => {
                self.node.request_table.complete(message_id, encode_body(&body)?);
            }
        }
        Ok(())
    }

    /// Replies with this node's own hood range and neighborhood ids; any
    /// id the reply will carry that we don't already know is handed to
    /// `unknown_nodes` so a future round can attempt to elevate it (spec
    /// §4.5).
    async fn handle_ping_request(&self, from_addr: SocketAddr, from: NodeInstance, message_id: u64, body: PingRequestBody) -> Result<()> {
        if self.node.table.lookup(from.id).is_none() && self.node.unknown_nodes.observe(from.id) {
            debug!(sender = %from.id, "ping request from a previously unseen node");
        }
        let _ = body;
        let neighborhood = self.node.table.neighborhood();
        let reply_body = PingReplyBody {
            receiver_range: self.node.table.this_node().token.range(),
            partner_ids: neighborhood.iter().map(|p| p.id()).collect(),
        };
        let envelope = Envelope::PingReply { message_id, body: reply_body };
        let target = self.node.transport.resolve_target(from_addr).await?;
        self.node.transport.send_one_way(&target, encode(&envelope)?).await
    }

    /// Voter-side arbitration decision (spec §4.6): consults the local
    /// `ArbitrationTable` for a recent conflicting claim against `subject`
    /// and replies with the verdict.
    async fn handle_arbitration_request(&self, from_addr: SocketAddr, from: NodeInstance, message_id: u64, body: ArbitrationRequest) -> Result<()> {
        let _ = from;
        let subject_reported = self.node.arbitration.decide(body.subject, body.history_needed, self.node.context.clock.as_ref());
        let reply_body = ArbitrationReply {
            subject_ttl: body.subject_ttl,
            monitor_ttl: body.subject_ttl,
            subject_reported,
            flags: ArbitrationFlags::NONE,
            weight: 1,
        };
        let envelope = Envelope::ArbitrationReply { message_id, body: reply_body };
        let target = self.node.transport.resolve_target(from_addr).await?;
        self.node.transport.send_one_way(&target, encode(&envelope)?).await
    }

    /// Replies to a gossip target's `UpdateRequest` with this node's own
    /// known range and current global-time epoch (spec §4.11); the
    /// requester's advertised `body.range` is the gap it's trying to fill,
    /// not something this node needs to act on beyond answering.
    async fn handle_update_request(&self, from_addr: SocketAddr, from: NodeInstance, message_id: u64, body: UpdateRequestBody) -> Result<()> {
        let _ = from;
        let _ = body.range;
        let reply_body = UpdateReply {
            global_lease_epoch: self.node.global_time.epoch(),
            update_range: self.node.table.this_node().token.range(),
            is_to_exponential_target: body.is_exponential_target,
        };
        let envelope = Envelope::UpdateReply { message_id, body: reply_body };
        let target = self.node.transport.resolve_target(from_addr).await?;
        self.node.transport.send_one_way(&target, encode(&envelope)?).await
    }

    /// Bootstrap's Introduce phase (spec §4.7): folds the requester's
    /// down-voter knowledge into ours and reports whether global time is
    /// already established here, which a candidate treats as a signal that
    /// a primary already exists somewhere and a bootstrap race isn't
    /// needed.
    async fn handle_introduce_request(&self, from_addr: SocketAddr, from: NodeInstance, message_id: u64, body: IntroduceRequestBody) -> Result<()> {
        let _ = from;
        self.node.voter_store.merge_down_voters(&body.down_voters);
        let reply_body = IntroduceReplyBody {
            global_time_known: self.node.global_time.epoch() > 0,
            down_voters: self.node.voter_store.down_voters(),
        };
        let envelope = Envelope::IntroduceReply { message_id, body: reply_body };
        let target = self.node.transport.resolve_target(from_addr).await?;
        self.node.transport.send_one_way(&target, encode(&envelope)?).await
    }

    /// Answers a config query (spec §4.7). When this node is the current
    /// primary, admitting the requester here and handing back a full
    /// snapshot is the join-plus-catch-up round trip a new secondary needs;
    /// a non-primary reports only what it knows so the requester falls
    /// through to the bootstrap race instead.
    async fn handle_config_query_request(&self, from_addr: SocketAddr, from: NodeInstance, message_id: u64) -> Result<()> {
        let reply_body = if self.node.voter_store.phase() == federation_voterstore::ReplicaPhase::Primary {
            if let Err(err) = self.node.voter_store.admit_replica(from, Instant::now()) {
                if err.code() != ErrorCode::AlreadyExists {
                    return Err(err);
                }
            }
            let (entries, highest_sequence) = self.node.voter_store.entries_snapshot();
            ConfigQueryReplyBody {
                has_primary: true,
                replica_set: snapshot_replica_set(&self.node.voter_store.replica_set_snapshot()),
                entries,
                highest_sequence,
            }
        } else {
            let (generation, epoch) = self.node.voter_store.generation_epoch();
            ConfigQueryReplyBody {
                has_primary: false,
                replica_set: ReplicaSetSnapshot { generation, epoch, replicas: Vec::new() },
                entries: Vec::new(),
                highest_sequence: 0,
            }
        };
        let envelope = Envelope::ConfigQueryReply { message_id, body: reply_body };
        let target = self.node.transport.resolve_target(from_addr).await?;
        self.node.transport.send_one_way(&target, encode(&envelope)?).await
    }

    /// Votes in the bootstrap race (spec §4.7): accepts the first candidate
    /// seen, and afterwards only a numerically smaller id displaces it, the
    /// same tie-break `federation_voterstore::accepts_bootstrap_request`
    /// documents. The accepted candidate is remembered only for the
    /// lifetime of this handler, not persisted across a restart.
    async fn handle_bootstrap_request(&self, from_addr: SocketAddr, from: NodeInstance, message_id: u64, body: BootstrapRequestBody) -> Result<()> {
        let _ = body.leader_instance;
        let accepted = {
            let mut guard = self.accepted_bootstrap_candidate.lock().unwrap();
            let accept = accepts_bootstrap_request(*guard, from.id);
            if accept {
                *guard = Some(from.id);
            }
            accept
        };
        let envelope = Envelope::BootstrapReply { message_id, body: BootstrapReplyBody { accepted } };
        let target = self.node.transport.resolve_target(from_addr).await?;
        self.node.transport.send_one_way(&target, encode(&envelope)?).await
    }

    /// Applies a primary's per-write push (spec §4.7's steady-state Sync)
    /// and acks the sequence it landed at.
    async fn handle_sync_request(&self, from_addr: SocketAddr, from: NodeInstance, message_id: u64, body: SyncRequestBody) -> Result<()> {
        let _ = from;
        self.node.voter_store.apply_replicated_write(&body.key, body.value, body.sequence);
        let envelope = Envelope::SyncReply {
            message_id,
            body: SyncReplyBody { key: body.key, acked_sequence: body.sequence },
        };
        let target = self.node.transport.resolve_target(from_addr).await?;
        self.node.transport.send_one_way(&target, encode(&envelope)?).await
    }

    /// Answers a failover candidate's progress request with this replica's
    /// own highest known sequence (spec §4.7's primary failover).
    async fn handle_progress_request(&self, from_addr: SocketAddr, from: NodeInstance, message_id: u64, body: ProgressRequestBody) -> Result<()> {
        let _ = (from, body.leader_instance);
        let envelope = Envelope::ProgressReply {
            message_id,
            body: ProgressReplyBody { sequence: self.node.voter_store.highest_sequence() },
        };
        let target = self.node.transport.resolve_target(from_addr).await?;
        self.node.transport.send_one_way(&target, encode(&envelope)?).await
    }

    async fn handle_routing_request(&self, from_addr: SocketAddr, header: RoutingHeader, payload: Bytes) -> Result<()> {
        let expects_reply = header.expects_reply;
        let message_id = header.message_id;
        match self.node.router.resolve_hop(&header)? {
            RouteHop::Local => {
                if let Some(reply) = self.node.router.deliver_locally(header, payload).await? {
                    if expects_reply {
                        let envelope = Envelope::RoutingReply {
                            message_id,
                            payload: reply.to_vec(),
                            global_time: self.node.global_time.exchange_header(),
                        };
                        let target = self.node.transport.resolve_target(from_addr).await?;
                        self.node.transport.send_one_way(&target, encode(&envelope)?).await?;
                    }
                }
            }
            RouteHop::Remote(next) => {
                let forwarded = Envelope::RoutingRequest { header, payload: payload.to_vec() };
                self.node.router.forward_raw(&next, encode(&forwarded)?).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl InboundHandler for NodeInboundHandler {
    async fn on_message(&self, from: SocketAddr, payload: Bytes) {
        let envelope = match decode(&payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%from, %err, "dropping inbound frame that failed to decode");
                return;
            }
        };
        if let Err(err) = self.handle(from, envelope).await {
            warn!(%from, %err, "failed to handle inbound frame");
        }
    }

    fn on_disconnect(&self, from: SocketAddr) {
        debug!(%from, "peer connection closed");
    }
}
