//! P2P dispatch: routes an inbound, already-deframed message to exactly one
//! actor (spec §4.3). Grounded on `spark-core::data_plane::pipeline`'s
//! filter-chain-then-handler dispatch shape.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use federation_core::error::ErrorCode;
use federation_core::{FederationError, Result};
use federation_ring::NodeInstance;
use federation_table::RoutingTable;
use federation_transport::headers::{Actor, PToPHeader};
use std::sync::Arc;
use tracing::trace;

/// A filter may veto or rewrite delivery before a handler runs; filters for
/// one actor run in insertion order, and the first one that returns
/// `Some` short-circuits the rest (spec §4.3: "apply registered filters in
/// insertion order and deliver to the first matching handler").
pub trait MessageFilter: Send + Sync + 'static {
    fn accepts(&self, header: &PToPHeader, payload: &Bytes) -> bool;
}

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, header: PToPHeader, payload: Bytes) -> Result<()>;
}

struct Registration {
    filter: Option<Arc<dyn MessageFilter>>,
    handler: Arc<dyn MessageHandler>,
}

/// Per-actor ordered handler list plus the shared `RoutingTable` every
/// dispatch call touches to refresh `last_accessed` on the sender.
pub struct Dispatcher {
    table: Arc<RoutingTable>,
    handlers: DashMap<ActorKey, Vec<Registration>>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct ActorKey(u8);

impl From<Actor> for ActorKey {
    fn from(actor: Actor) -> Self {
        ActorKey(match actor {
            Actor::Direct => 0,
            Actor::Federation => 1,
            Actor::Routing => 2,
            Actor::Broadcast => 3,
        })
    }
}

impl Dispatcher {
    pub fn new(table: Arc<RoutingTable>) -> Self {
        Self {
            table,
            handlers: DashMap::new(),
        }
    }

    /// Registers a handler for `actor`, optionally gated by a filter.
    /// Handlers for the same actor are tried in registration order.
    pub fn register(
        &self,
        actor: Actor,
        handler: Arc<dyn MessageHandler>,
        filter: Option<Arc<dyn MessageFilter>>,
    ) {
        self.handlers
            .entry(actor.into())
            .or_default()
            .push(Registration { filter, handler });
    }

    /// Dispatches one inbound message per spec §4.3's four steps.
    pub async fn dispatch(&self, header: PToPHeader, payload: Bytes) -> Result<()> {
        let local_id = self.table.this_node_id();
        if header.to.id != local_id {
            return Err(FederationError::new(
                ErrorCode::P2PNodeDoesNotMatchFault,
                format!("message addressed to {} but local node is {local_id}", header.to.id),
            ));
        }
        let local_instance = self.table.this_node().instance;
        if header.exact_instance && header.to.instance_id != local_instance.instance_id {
            return Err(FederationError::new(
                ErrorCode::P2PNodeDoesNotMatchFault,
                "exact_instance requested but local instance_id has advanced",
            ));
        }

        self.touch_sender(header.from);

        let key = ActorKey::from(header.actor);
        let registrations = self.handlers.get(&key);
        let Some(registrations) = registrations else {
            return Err(FederationError::new(
                ErrorCode::EndpointNotFound,
                "no handler registered for actor",
            ));
        };

        for registration in registrations.iter() {
            let accepted = registration
                .filter
                .as_ref()
                .map(|f| f.accepts(&header, &payload))
                .unwrap_or(true);
            if accepted {
                return registration.handler.handle(header, payload).await;
            }
        }
        trace!(?header.actor, "every registered filter rejected the message");
        Err(FederationError::new(
            ErrorCode::InvalidMessage,
            "no registered handler's filter accepted this message",
        ))
    }

    fn touch_sender(&self, from: NodeInstance) {
        self.table.touch(from.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federation_ring::NodeId;
    use federation_table::{Phase, PartnerNode, RoutingTableConfig};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn this_node() -> PartnerNode {
        let mut p = PartnerNode::new(NodeInstance::new(NodeId::new(1), 1), addr(9000), "ring0");
        p.phase = Phase::Routing;
        p
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _header: PToPHeader, _payload: Bytes) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn header(to: NodeInstance, exact: bool) -> PToPHeader {
        PToPHeader {
            from: NodeInstance::new(NodeId::new(2), 1),
            from_ring: "ring0".into(),
            to,
            to_ring: "ring0".into(),
            actor: Actor::Direct,
            exact_instance: exact,
        }
    }

    #[tokio::test]
    async fn dispatches_to_the_registered_handler_for_the_actor() {
        let table = Arc::new(RoutingTable::new(this_node(), RoutingTableConfig::default()));
        let dispatcher = Dispatcher::new(table);
        let count = Arc::new(AtomicUsize::new(0));
        dispatcher.register(Actor::Direct, Arc::new(CountingHandler(count.clone())), None);

        let hdr = header(NodeInstance::new(NodeId::new(1), 1), false);
        dispatcher.dispatch(hdr, Bytes::new()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_message_addressed_to_a_different_node() {
        let table = Arc::new(RoutingTable::new(this_node(), RoutingTableConfig::default()));
        let dispatcher = Dispatcher::new(table);
        let hdr = header(NodeInstance::new(NodeId::new(999), 1), false);
        let err = dispatcher.dispatch(hdr, Bytes::new()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::P2PNodeDoesNotMatchFault);
    }

    #[tokio::test]
    async fn exact_instance_mismatch_is_rejected() {
        let table = Arc::new(RoutingTable::new(this_node(), RoutingTableConfig::default()));
        let dispatcher = Dispatcher::new(table);
        let hdr = header(NodeInstance::new(NodeId::new(1), 2), true);
        let err = dispatcher.dispatch(hdr, Bytes::new()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::P2PNodeDoesNotMatchFault);
    }

    #[tokio::test]
    async fn missing_handler_reports_endpoint_not_found() {
        let table = Arc::new(RoutingTable::new(this_node(), RoutingTableConfig::default()));
        let dispatcher = Dispatcher::new(table);
        let hdr = header(NodeInstance::new(NodeId::new(1), 1), false);
        let err = dispatcher.dispatch(hdr, Bytes::new()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::EndpointNotFound);
    }
}
