//! One TCP connection, wrapping a `tokio::net::TcpStream` split into a
//! write half guarded by a `tokio::sync::Mutex` (serializing concurrent
//! `send_one_way` calls the way `spark-transport-tcp::TcpChannel` guards
//! its single stream) and a read half driven by a background task that
//! feeds every inbound frame to an `InboundHandler`.

use crate::framing::{io_error, read_frame, write_frame};
use async_trait::async_trait;
use bytes::Bytes;
use federation_core::error::ErrorCode;
use federation_core::{FederationError, Result};
use federation_transport::SendTargetHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// Delivers an inbound frame to whatever owns message dispatch (the
/// node's `federation_p2p::Dispatcher` plus `federation_routing::Router`
/// reply correlation, once wired together).
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn on_message(&self, from: SocketAddr, payload: Bytes);
    fn on_disconnect(&self, from: SocketAddr);
}

pub struct TcpConnection {
    peer_addr: SocketAddr,
    writer: AsyncMutex<OwnedWriteHalf>,
}

impl TcpConnection {
    /// Splits `stream` and spawns the background read loop; `handler`
    /// receives every inbound frame and a single `on_disconnect` call when
    /// the loop exits for any reason.
    pub fn spawn(stream: TcpStream, peer_addr: SocketAddr, handler: Arc<dyn InboundHandler>) -> Arc<Self> {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let connection = Arc::new(Self {
            peer_addr,
            writer: AsyncMutex::new(write_half),
        });
        tokio::spawn(read_loop(read_half, peer_addr, handler));
        connection
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

async fn read_loop(mut read_half: OwnedReadHalf, peer_addr: SocketAddr, handler: Arc<dyn InboundHandler>) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(Some(payload)) => handler.on_message(peer_addr, payload).await,
            Ok(None) => {
                debug!(%peer_addr, "peer closed the connection");
                break;
            }
            Err(err) => {
                warn!(%peer_addr, %err, "tcp read loop failed");
                break;
            }
        }
    }
    handler.on_disconnect(peer_addr);
}

#[async_trait]
impl SendTargetHandle for TcpConnection {
    async fn send_one_way(&self, payload: Bytes) -> Result<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &payload).await
    }

    /// This transport has no request/reply correlation of its own — every
    /// reply arrives as an ordinary inbound frame, handed to
    /// `InboundHandler::on_message` and correlated one layer up by
    /// `federation_p2p::RequestTable`/`federation_routing::Router`. Calling
    /// this directly is therefore always a configuration error.
    async fn begin_request(&self, _payload: Bytes, _timeout: Duration) -> Result<Bytes> {
        Err(FederationError::new(
            ErrorCode::InvalidConfiguration,
            "federation-transport-tcp has no request/reply correlation of its own; route replies through RequestTable instead",
        ))
    }
}

pub(crate) async fn dial(address: SocketAddr) -> Result<TcpStream> {
    TcpStream::connect(address).await.map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;

    struct RecordingHandler {
        received: Arc<StdMutex<Vec<Bytes>>>,
        disconnected: Arc<StdMutex<bool>>,
    }

    #[async_trait]
    impl InboundHandler for RecordingHandler {
        async fn on_message(&self, _from: SocketAddr, payload: Bytes) {
            self.received.lock().unwrap().push(payload);
        }
        fn on_disconnect(&self, _from: SocketAddr) {
            *self.disconnected.lock().unwrap() = true;
        }
    }

    #[tokio::test]
    async fn a_sent_frame_is_delivered_to_the_peers_inbound_handler() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let received = Arc::new(StdMutex::new(Vec::new()));
        let disconnected = Arc::new(StdMutex::new(false));
        let handler = Arc::new(RecordingHandler {
            received: received.clone(),
            disconnected: disconnected.clone(),
        });

        let accept_handler = handler.clone();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            TcpConnection::spawn(stream, peer, accept_handler);
        });

        let client_stream = dial(addr).await.unwrap();
        let client_peer = client_stream.peer_addr().unwrap();
        let client = TcpConnection::spawn(client_stream, client_peer, Arc::new(RecordingHandler {
            received: Arc::new(StdMutex::new(Vec::new())),
            disconnected: Arc::new(StdMutex::new(false)),
        }));

        client.send_one_way(Bytes::from_static(b"ping")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.lock().unwrap().as_slice(), &[Bytes::from_static(b"ping")]);
    }

    #[tokio::test]
    async fn begin_request_is_unsupported_at_this_layer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });
        let stream = dial(addr).await.unwrap();
        let peer = stream.peer_addr().unwrap();
        let handler = Arc::new(RecordingHandler {
            received: Arc::new(StdMutex::new(Vec::new())),
            disconnected: Arc::new(StdMutex::new(false)),
        });
        let connection = TcpConnection::spawn(stream, peer, handler);
        let err = connection.begin_request(Bytes::new(), Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }
}
