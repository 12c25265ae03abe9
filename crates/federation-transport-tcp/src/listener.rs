//! Accept loop binding `federation_transport_tcp::TcpTransport`'s
//! connection pool to inbound connections, grounded on the teacher's
//! `spark-transport-tcp::TcpListener`.

use crate::transport::TcpTransport;
use federation_core::error::ErrorCode;
use federation_core::{FederationError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener as TokioTcpListener;
use tracing::{info, warn};

pub struct TcpListener {
    local_addr: SocketAddr,
    inner: TokioTcpListener,
}

impl TcpListener {
    pub async fn bind(address: SocketAddr) -> Result<Self> {
        let inner = TokioTcpListener::bind(address)
            .await
            .map_err(|err| FederationError::new(ErrorCode::AddressAlreadyInUse, format!("failed to bind {address}: {err}")))?;
        let local_addr = inner.local_addr().map_err(|err| FederationError::new(ErrorCode::InvalidAddress, err.to_string()))?;
        Ok(Self { local_addr, inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until the process shuts down, handing each one
    /// to `transport` so outbound sends to that peer reuse the inbound
    /// socket (spec §6: one `SendTarget` per peer).
    pub async fn serve(self, transport: Arc<TcpTransport>) {
        loop {
            match self.inner.accept().await {
                Ok((stream, peer_addr)) => {
                    info!(%peer_addr, "accepted inbound tcp connection");
                    transport.adopt_inbound(stream, peer_addr);
                }
                Err(err) => {
                    warn!(%err, "tcp accept failed");
                }
            }
        }
    }
}
