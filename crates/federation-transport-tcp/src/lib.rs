//! A `federation_transport::Transport` implementation over raw TCP,
//! grounded on the teacher's `spark-transport-tcp` crate: a length-prefixed
//! framing layer, one connection per peer with its write half serialized by
//! an async mutex, a background read loop per connection, and a pool that
//! dials lazily and reuses a connection already open to the same address.

pub mod connection;
pub mod framing;
pub mod listener;
pub mod transport;

pub use connection::{InboundHandler, TcpConnection};
pub use listener::TcpListener;
pub use transport::TcpTransport;
