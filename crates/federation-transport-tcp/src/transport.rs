//! `TcpTransport`: the `federation_transport::Transport` implementation
//! backing production deployments. Grounded on the teacher's
//! `spark-transport-tcp` crate's separation of a connection pool (dialing,
//! reuse) from per-connection read/write handling (`connection.rs`).

use crate::connection::{dial, InboundHandler, TcpConnection};
use async_trait::async_trait;
use dashmap::DashMap;
use federation_transport::{ConnectionFaultHandler, SendTarget, Transport};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing::info;

struct DisconnectNotifier {
    inner: Arc<dyn InboundHandler>,
    pool: Arc<DashMap<SocketAddr, Arc<TcpConnection>>>,
    fault_handler: Arc<Mutex<Option<ConnectionFaultHandler>>>,
}

#[async_trait]
impl InboundHandler for DisconnectNotifier {
    async fn on_message(&self, from: SocketAddr, payload: bytes::Bytes) {
        self.inner.on_message(from, payload).await;
    }

    fn on_disconnect(&self, from: SocketAddr) {
        self.pool.remove(&from);
        self.inner.on_disconnect(from);
        if let Some(handler) = self.fault_handler.lock().unwrap().as_ref() {
            handler(from);
        }
    }
}

/// A pool of outbound TCP connections, dialing lazily and reusing an
/// existing connection to the same address (spec §6: "one `SendTarget`
/// corresponds to one peer").
pub struct TcpTransport {
    local_address: SocketAddr,
    pool: Arc<DashMap<SocketAddr, Arc<TcpConnection>>>,
    inbound_handler: Arc<dyn InboundHandler>,
    fault_handler: Arc<Mutex<Option<ConnectionFaultHandler>>>,
}

impl TcpTransport {
    pub fn new(local_address: SocketAddr, inbound_handler: Arc<dyn InboundHandler>) -> Self {
        Self {
            local_address,
            pool: Arc::new(DashMap::new()),
            inbound_handler,
            fault_handler: Arc::new(Mutex::new(None)),
        }
    }

    /// Registers an already-accepted inbound connection (used by
    /// `TcpListener`'s accept loop) so outbound sends to that peer reuse it
    /// instead of dialing a second connection.
    pub(crate) fn adopt_inbound(&self, stream: tokio::net::TcpStream, peer_addr: SocketAddr) {
        let handler = Arc::new(DisconnectNotifier {
            inner: self.inbound_handler.clone(),
            pool: self.pool.clone(),
            fault_handler: self.fault_handler.clone(),
        });
        let connection = TcpConnection::spawn(stream, peer_addr, handler);
        self.pool.insert(peer_addr, connection);
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn resolve_target(&self, address: SocketAddr) -> federation_core::Result<SendTarget> {
        if let Some(existing) = self.pool.get(&address) {
            return Ok(SendTarget::new(address, existing.clone()));
        }

        let stream = dial(address).await?;
        let handler = Arc::new(DisconnectNotifier {
            inner: self.inbound_handler.clone(),
            pool: self.pool.clone(),
            fault_handler: self.fault_handler.clone(),
        });
        let connection = TcpConnection::spawn(stream, address, handler);
        self.pool.insert(address, connection.clone());
        info!(%address, "dialed new tcp connection");
        Ok(SendTarget::new(address, connection))
    }

    fn set_connection_fault_handler(&self, handler: ConnectionFaultHandler) {
        *self.fault_handler.lock().unwrap() = Some(handler);
    }

    fn local_address(&self) -> SocketAddr {
        self.local_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener as TokioTcpListener;

    struct RecordingHandler {
        received: Arc<StdMutex<Vec<Bytes>>>,
    }

    #[async_trait]
    impl InboundHandler for RecordingHandler {
        async fn on_message(&self, _from: SocketAddr, payload: Bytes) {
            self.received.lock().unwrap().push(payload);
        }
        fn on_disconnect(&self, _from: SocketAddr) {}
    }

    #[tokio::test]
    async fn resolve_target_dials_once_and_reuses_the_connection() {
        let listener = TokioTcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(StdMutex::new(Vec::new()));
        let server_handler = Arc::new(RecordingHandler { received: received.clone() });
        tokio::spawn(async move {
            loop {
                let (stream, peer) = listener.accept().await.unwrap();
                crate::connection::TcpConnection::spawn(stream, peer, server_handler.clone());
            }
        });

        let transport = TcpTransport::new(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(RecordingHandler { received: Arc::new(StdMutex::new(Vec::new())) }),
        );
        let first = transport.resolve_target(addr).await.unwrap();
        let second = transport.resolve_target(addr).await.unwrap();
        assert_eq!(transport.pool.len(), 1);

        transport.send_one_way(&first, Bytes::from_static(b"a")).await.unwrap();
        transport.send_one_way(&second, Bytes::from_static(b"b")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(received.lock().unwrap().len(), 2);
    }
}
