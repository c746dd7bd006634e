//! Router/dealer transport abstraction over the ZeroMQ-style multi-socket
//! wire: a router side that accepts many peers and routes by opaque
//! identity, and a dealer side that owns exactly one connection to a
//! router.
//!
//! Two implementations are provided: `mem` (in-process, used by tests and
//! the pipe handler) and `stream` (length-prefixed framing over TCP). Both
//! are exposed through the same `Transport` enum so the rest of the crate
//! never matches on implementation details directly.

mod mem;
mod stream;

use std::fmt;

use bytes::Bytes;

pub use mem::{MemContext, MemDealer, MemRouter};
pub use stream::{StreamDealer, StreamRouter};

/// Errors a transport implementation can raise.
#[derive(Debug)]
pub enum TransportError {
    Closed,
    ConnectionRefused { address: String },
    Io(std::io::Error),
    MalformedFrame(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "transport closed"),
            TransportError::ConnectionRefused { address } => {
                write!(f, "connection refused: {address}")
            }
            TransportError::Io(e) => write!(f, "io error: {e}"),
            TransportError::MalformedFrame(msg) => write!(f, "malformed frame: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}

/// The router half of a multi-socket transport: accepts frame sequences
/// from many peers, each tagged with an opaque identity, and can address a
/// reply back to a specific identity.
pub enum Router {
    Mem(MemRouter),
    Stream(StreamRouter),
}

impl Router {
    pub async fn recv(&mut self) -> Result<(Bytes, Vec<Bytes>), TransportError> {
        match self {
            Router::Mem(r) => r.recv().await,
            Router::Stream(r) => r.recv().await,
        }
    }

    pub async fn send(&mut self, identity: &Bytes, frames: Vec<Bytes>) -> Result<(), TransportError> {
        match self {
            Router::Mem(r) => r.send(identity, frames).await,
            Router::Stream(r) => r.send(identity, frames).await,
        }
    }

    /// Non-blocking poll: returns `Ok(None)` if nothing is ready yet.
    pub async fn try_recv(&mut self) -> Result<Option<(Bytes, Vec<Bytes>)>, TransportError> {
        match self {
            Router::Mem(r) => r.try_recv().await,
            Router::Stream(r) => r.try_recv().await,
        }
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        match self {
            Router::Mem(r) => r.close().await,
            Router::Stream(r) => r.close().await,
        }
    }
}

/// The dealer half: owns exactly one logical connection to a router.
pub enum Dealer {
    Mem(MemDealer),
    Stream(StreamDealer),
}

impl Dealer {
    pub async fn send(&mut self, frames: Vec<Bytes>) -> Result<(), TransportError> {
        match self {
            Dealer::Mem(d) => d.send(frames).await,
            Dealer::Stream(d) => d.send(frames).await,
        }
    }

    pub async fn recv(&mut self) -> Result<Vec<Bytes>, TransportError> {
        match self {
            Dealer::Mem(d) => d.recv().await,
            Dealer::Stream(d) => d.recv().await,
        }
    }

    /// Non-blocking poll: returns `Ok(None)` if nothing is ready yet. Used
    /// by the directory's "check unfinished connections" pass, which must
    /// never block the coordinator's main loop.
    pub async fn try_recv(&mut self) -> Result<Option<Vec<Bytes>>, TransportError> {
        match self {
            Dealer::Mem(d) => d.try_recv().await,
            Dealer::Stream(d) => d.try_recv().await,
        }
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        match self {
            Dealer::Mem(d) => d.close().await,
            Dealer::Stream(d) => d.close().await,
        }
    }
}
