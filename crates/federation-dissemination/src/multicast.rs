//! Multicast to an explicit `NodeInstance` target list (spec §4.9).
//! Grounded on `Multicast.h`'s `MulticastReplyContext` and
//! `MulticastTargetsHeader.h`'s per-hop target-list header. Unlike
//! `Broadcast`, target partitioning already picks the next hop, so this
//! sends directly through `Transport` rather than through
//! `federation_routing::Router` (which would hop-select a second time).

use bytes::Bytes;
use federation_core::Result;
use federation_ring::{NodeId, NodeInstance};
use federation_table::{PartnerNode, RoutingTable};
use federation_transport::Transport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Delivers a multicast payload addressed to a target that resolves to
/// this node. Implemented by the in-process actor the node wires in,
/// mirroring `federation_routing::LocalDeliveryHandler`.
#[async_trait::async_trait]
pub trait MulticastLocalHandler: Send + Sync + 'static {
    async fn deliver(&self, target: NodeInstance, payload: Bytes) -> Result<Option<Bytes>>;
}

/// One reply to a multicast, tagged with which destination it answers
/// (`requestDestination` in the original).
pub struct MulticastReply {
    pub reply: Bytes,
    pub request_destination: NodeInstance,
}

pub struct Multicast {
    table: Arc<RoutingTable>,
    transport: Arc<dyn Transport>,
    local_handler: Arc<dyn MulticastLocalHandler>,
}

impl Multicast {
    pub fn new(table: Arc<RoutingTable>, transport: Arc<dyn Transport>, local_handler: Arc<dyn MulticastLocalHandler>) -> Self {
        Self {
            table,
            transport,
            local_handler,
        }
    }

    fn group_by_hop(&self, destinations: &[NodeInstance]) -> (Vec<NodeInstance>, HashMap<NodeId, (PartnerNode, Vec<NodeInstance>)>) {
        let this = self.table.this_node();
        let candidates = self.table.all_entries();
        let mut local = Vec::new();
        let mut by_hop: HashMap<NodeId, (PartnerNode, Vec<NodeInstance>)> = HashMap::new();

        for &destination in destinations {
            if destination.id == this.id() {
                local.push(destination);
                continue;
            }
            match federation_routing::select_next_hop(&candidates, destination.id) {
                Some(hop) => {
                    by_hop.entry(hop.id()).or_insert_with(|| (hop.clone(), Vec::new())).1.push(destination);
                }
                None => {
                    // No known route at all; the original drops these on the
                    // floor too since a dead-letter destination can't be dialed.
                }
            }
        }
        (local, by_hop)
    }

    /// Sends `payload_for(group)` to each next-hop bucket (built via
    /// `group_by_hop`) and delivers local destinations directly through
    /// `local_handler`. Replies (local and a future wire reply, once a
    /// transport round-trip is wired in) are pushed onto `reply_sender` as
    /// they resolve. Returns the destinations that had no known route at
    /// all.
    pub async fn send(
        &self,
        destinations: Vec<NodeInstance>,
        payload_for: impl Fn(&[NodeInstance]) -> Bytes,
        reply_sender: mpsc::UnboundedSender<MulticastReply>,
    ) -> Result<Vec<NodeInstance>> {
        let (local, by_hop) = self.group_by_hop(&destinations);
        let known_ids: std::collections::HashSet<NodeId> = local.iter().map(|d| d.id).chain(by_hop.values().flat_map(|(_, ds)| ds.iter().map(|d| d.id))).collect();
        let undeliverable = destinations.into_iter().filter(|d| !known_ids.contains(&d.id)).collect();

        for destination in &local {
            let payload = payload_for(std::slice::from_ref(destination));
            if let Some(reply) = self.local_handler.deliver(*destination, payload).await? {
                let _ = reply_sender.send(MulticastReply {
                    reply,
                    request_destination: *destination,
                });
            }
        }

        for (_, (hop, group)) in by_hop {
            let payload = payload_for(&group);
            let target = self.transport.resolve_target(hop.physical_address).await?;
            self.transport.send_one_way(&target, payload).await?;
        }

        Ok(undeliverable)
    }
}

/// Tracks which destinations of a multicast still owe a reply, mirroring
/// `MulticastReplyContext`'s `replies_` queue plus `destinations_` list.
pub struct MulticastReplyContext {
    outstanding: Mutex<Vec<NodeInstance>>,
    receiver: Mutex<mpsc::UnboundedReceiver<MulticastReply>>,
}

impl MulticastReplyContext {
    pub fn new(destinations: Vec<NodeInstance>, receiver: mpsc::UnboundedReceiver<MulticastReply>) -> Self {
        Self {
            outstanding: Mutex::new(destinations),
            receiver: Mutex::new(receiver),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding.lock().is_empty()
    }

    pub async fn next_reply(&self, timeout: std::time::Duration) -> Result<Option<MulticastReply>> {
        if self.is_complete() {
            return Ok(None);
        }
        let mut receiver = self.receiver.lock();
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(reply)) => {
                self.outstanding.lock().retain(|d| d.id != reply.request_destination.id);
                Ok(Some(reply))
            }
            Ok(None) | Err(_) => Ok(None),
        }
    }
}
