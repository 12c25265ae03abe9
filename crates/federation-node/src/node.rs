//! Assembles every other crate's components into one running node,
//! mirroring `federation_core::CoreContext`'s own stated philosophy: build
//! one context per ring and thread it through every component's
//! constructor rather than reaching for global state.

use crate::delivery::DispatchingLocalDelivery;
use federation_core::{CoreContext, FederationConfig};
use federation_dissemination::{ExpiringSet, Multicast, MulticastLocalHandler, ReliableBroadcast, UnreliableBroadcast};
use federation_gossip::{GlobalTimeManager, GlobalTimeManagerConfig, UpdateManager};
use federation_membership::{ArbitrationTable, JoinLockTable, UnknownNodeTracker};
use federation_p2p::{Dispatcher, RequestTable};
use federation_ring::NodeInstance;
use federation_routing::{LocalDeliveryHandler, Router, SeedDirectory};
use federation_table::{PartnerNode, RoutingTable, RoutingTableConfig};
use federation_transport::Transport;
use federation_voterstore::VoterStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Every live component of a federation node, reachable by name so a
/// caller (an actor registering itself with `dispatcher`, a background
/// task driving `update_manager`) never has to reconstruct one from its
/// constituents.
pub struct FederationNode {
    pub context: Arc<CoreContext>,
    pub table: Arc<RoutingTable>,
    pub transport: Arc<dyn Transport>,
    pub dispatcher: Arc<Dispatcher>,
    pub request_table: Arc<RequestTable>,
    pub router: Arc<Router>,
    pub seeds: Arc<SeedDirectory>,
    pub join_locks: Arc<JoinLockTable>,
    pub unknown_nodes: Arc<UnknownNodeTracker>,
    pub arbitration: Arc<ArbitrationTable>,
    pub voter_store: Arc<VoterStore>,
    pub unreliable_broadcast: Arc<UnreliableBroadcast>,
    pub reliable_broadcast: Arc<ReliableBroadcast>,
    pub multicast: Arc<Multicast>,
    pub global_time: Arc<GlobalTimeManager>,
    pub update_manager: Arc<UpdateManager>,
    next_message_id: AtomicU64,
}

impl FederationNode {
    /// Wires one node together around `this_node`'s own ring entry and an
    /// already-constructed transport, the way production code supplies a
    /// `federation_transport_tcp::TcpTransport` and a test supplies an
    /// in-memory one. `local_handler` is consulted by `multicast` for a
    /// message explicitly addressed to this node's instance; point-to-point
    /// traffic for ring-owned ids instead lands on `dispatcher` through
    /// `router`'s local-delivery callback.
    pub fn new(
        config: FederationConfig,
        context: Arc<CoreContext>,
        this_node: PartnerNode,
        transport: Arc<dyn Transport>,
        multicast_handler: Arc<dyn MulticastLocalHandler>,
    ) -> Arc<Self> {
        let table = Arc::new(RoutingTable::new(
            this_node.clone(),
            RoutingTableConfig {
                hood_size: config.neighborhood_size as usize,
                capacity: config.routing_table_capacity,
            },
        ));
        let dispatcher = Arc::new(Dispatcher::new(table.clone()));
        let request_table = Arc::new(RequestTable::new());
        let seeds = Arc::new(SeedDirectory::new());
        let local_delivery: Arc<dyn LocalDeliveryHandler> =
            Arc::new(DispatchingLocalDelivery::new(table.clone(), dispatcher.clone()));
        let router = Arc::new(Router::new(
            table.clone(),
            transport.clone(),
            request_table.clone(),
            seeds.clone(),
            local_delivery,
        ));

        let join_locks = Arc::new(JoinLockTable::new(context.clock.clone(), config.join_lock_duration));
        let unknown_nodes = Arc::new(UnknownNodeTracker::new(context.clock.clone(), config.unknown_node_probe_timeout));
        let arbitration = Arc::new(ArbitrationTable::new());
        let voter_store = Arc::new(VoterStore::new(this_node.instance));

        let dedup = ExpiringSet::new(context.clock.clone(), config.broadcast_context_keep_duration);
        let unreliable_broadcast = Arc::new(UnreliableBroadcast::new(
            table.clone(),
            transport.clone(),
            dedup,
            config.broadcast_step_count_max,
        ));
        let reliable_broadcast = Arc::new(ReliableBroadcast::new(
            table.clone(),
            router.clone(),
            config.routing_retry_timeout,
            config.message_timeout,
        ));
        let multicast = Arc::new(Multicast::new(table.clone(), transport.clone(), multicast_handler));

        let global_time = Arc::new(GlobalTimeManager::new(
            context.clock.clone(),
            GlobalTimeManagerConfig {
                clock_drift_ratio: config.global_time_clock_drift_ratio,
                uncertainty_max_increase: config.global_time_uncertainty_max_increase,
                uncertainty_max_decrease: config.global_time_uncertainty_max_decrease,
                uncertainty_interval_upper_bound: config.global_time_uncertainty_interval_upper_bound,
                new_epoch_wait_interval: config.global_time_new_epoch_wait_interval,
            },
        ));
        let update_manager = Arc::new(UpdateManager::new(this_node.id(), config.max_update_target));

        Arc::new(Self {
            context,
            table,
            transport,
            dispatcher,
            request_table,
            router,
            seeds,
            join_locks,
            unknown_nodes,
            arbitration,
            voter_store,
            unreliable_broadcast,
            reliable_broadcast,
            multicast,
            global_time,
            update_manager,
            next_message_id: AtomicU64::new(1),
        })
    }

    pub fn this_instance(&self) -> NodeInstance {
        self.table.this_node().instance
    }

    /// A message id shared by every request/reply exchange `wire`/`gossip`
    /// originate outside `Router`'s own routed-request ids (`Ping`,
    /// `Arbitration`, voter-store bootstrap) — one counter per node is
    /// enough since `RequestTable` keys on this value alone.
    pub fn next_message_id(&self) -> u64 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }
}
