//! Bridges `federation_routing::Router`'s local-delivery callback into the
//! node's own `federation_p2p::Dispatcher`, so a message that has reached
//! the hop owning its destination's token range is handed to whichever
//! actor registered for it rather than the routing crate needing any
//! notion of message contents.

use async_trait::async_trait;
use bytes::Bytes;
use federation_core::Result;
use federation_p2p::Dispatcher;
use federation_routing::LocalDeliveryHandler;
use federation_table::RoutingTable;
use federation_transport::headers::{Actor, PToPHeader, RoutingHeader};
use std::sync::Arc;

pub struct DispatchingLocalDelivery {
    table: Arc<RoutingTable>,
    dispatcher: Arc<Dispatcher>,
}

impl DispatchingLocalDelivery {
    pub fn new(table: Arc<RoutingTable>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { table, dispatcher }
    }
}

#[async_trait]
impl LocalDeliveryHandler for DispatchingLocalDelivery {
    /// `Router` calls this once a target id has landed inside this node's
    /// owned token range, not necessarily because the target id equals this
    /// node's own id — a whole arc routes here. `Dispatcher::dispatch`
    /// expects a message addressed to the local instance specifically, so
    /// the rewrapped header addresses this node's own `NodeInstance` rather
    /// than forwarding `header.to` verbatim.
    async fn deliver(&self, header: RoutingHeader, payload: Bytes) -> Result<Option<Bytes>> {
        let this = self.table.this_node();
        let ptop = PToPHeader {
            from: header.from,
            from_ring: header.from_ring,
            to: this.instance,
            to_ring: header.to_ring,
            actor: Actor::Federation,
            exact_instance: false,
        };
        self.dispatcher.dispatch(ptop, payload).await?;
        Ok(None)
    }
}
