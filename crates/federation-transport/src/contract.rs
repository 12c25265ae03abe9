//! The external transport contract (spec §6, "consumed"): every component
//! routes through this trait rather than a concrete socket type, so
//! `federation-transport-tcp` is just one implementation and tests can swap
//! in an in-memory one. Grounded on the teacher's object-safe `dyn` transport
//! layer (`spark-core::data_plane::transport::traits::object`), which also
//! type-erases behind `async_trait` for exactly this reason: protocol
//! plurality behind one dispatch point.

use async_trait::async_trait;
use bytes::Bytes;
use federation_core::Result;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Opaque handle to a specific peer connection, returned by
/// [`Transport::resolve_target`]. Cheap to clone; holding one does not keep
/// the underlying connection alive past a fault.
#[derive(Clone)]
pub struct SendTarget {
    pub address: SocketAddr,
    inner: Arc<dyn SendTargetHandle>,
}

impl SendTarget {
    pub fn new(address: SocketAddr, inner: Arc<dyn SendTargetHandle>) -> Self {
        Self { address, inner }
    }

    pub(crate) fn handle(&self) -> &dyn SendTargetHandle {
        self.inner.as_ref()
    }
}

impl fmt::Debug for SendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SendTarget({})", self.address)
    }
}

/// Per-connection operations a concrete transport must provide; kept
/// separate from [`Transport`] so `SendTarget` stays `Clone` without cloning
/// the transport itself.
#[async_trait]
pub trait SendTargetHandle: Send + Sync + 'static {
    async fn send_one_way(&self, payload: Bytes) -> Result<()>;
    async fn begin_request(&self, payload: Bytes, timeout: Duration) -> Result<Bytes>;
}

/// Callback invoked when a connection to a previously resolved target is
/// lost. Registered once per transport instance (spec §6:
/// `set_connection_fault_handler`).
pub type ConnectionFaultHandler = Arc<dyn Fn(SocketAddr) + Send + Sync + 'static>;

/// The framed, duplex transport every component is built against. One
/// `SendTarget` corresponds to one peer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn resolve_target(&self, address: SocketAddr) -> Result<SendTarget>;

    async fn send_one_way(&self, target: &SendTarget, payload: Bytes) -> Result<()> {
        target.handle().send_one_way(payload).await
    }

    async fn begin_request(
        &self,
        target: &SendTarget,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        target.handle().begin_request(payload, timeout).await
    }

    fn set_connection_fault_handler(&self, handler: ConnectionFaultHandler);

    fn local_address(&self) -> SocketAddr;
}
