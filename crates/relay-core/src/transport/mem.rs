use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::TransportError;

#[derive(Clone)]
struct RouterHandle {
    incoming_tx: mpsc::UnboundedSender<(Bytes, Vec<Bytes>)>,
    senders: Arc<Mutex<HashMap<Bytes, mpsc::UnboundedSender<Vec<Bytes>>>>>,
}

/// An explicit, in-process "network" of mem transports. Tests (and the
/// pipe handler, for its internal caller-to-io-thread pipes) construct one
/// `MemContext` and pass it to every router/dealer that should be able to
/// reach each other; there is no implicit global registry.
#[derive(Clone, Default)]
pub struct MemContext {
    registry: Arc<Mutex<HashMap<String, RouterHandle>>>,
}

impl MemContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a router at `address` within this context.
    pub fn bind(&self, address: impl Into<String>) -> MemRouter {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let senders = Arc::new(Mutex::new(HashMap::new()));
        let handle = RouterHandle { incoming_tx, senders: senders.clone() };
        self.registry.lock().insert(address.into(), handle);
        MemRouter { rx: incoming_rx, senders }
    }

    /// Dial an address previously bound in this context.
    pub fn dial(&self, address: &str, identity: Bytes) -> Result<MemDealer, TransportError> {
        let handle = self
            .registry
            .lock()
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::ConnectionRefused { address: address.to_string() })?;
        let (to_dealer_tx, to_dealer_rx) = mpsc::unbounded_channel();
        handle.senders.lock().insert(identity.clone(), to_dealer_tx);
        Ok(MemDealer { identity, to_router: handle.incoming_tx, from_router: to_dealer_rx })
    }
}

/// Router half of an in-process transport: receives `(identity, frames)`
/// from any dealer dialed into this context at the bound address.
pub struct MemRouter {
    rx: mpsc::UnboundedReceiver<(Bytes, Vec<Bytes>)>,
    senders: Arc<Mutex<HashMap<Bytes, mpsc::UnboundedSender<Vec<Bytes>>>>>,
}

impl MemRouter {
    pub async fn recv(&mut self) -> Result<(Bytes, Vec<Bytes>), TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }

    pub async fn try_recv(&mut self) -> Result<Option<(Bytes, Vec<Bytes>)>, TransportError> {
        match self.rx.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }

    pub async fn send(&mut self, identity: &Bytes, frames: Vec<Bytes>) -> Result<(), TransportError> {
        let sender = self.senders.lock().get(identity).cloned();
        match sender {
            Some(tx) => tx.send(frames).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.senders.lock().clear();
        Ok(())
    }
}

/// Dealer half: owns exactly one logical connection to the router it
/// dialed.
pub struct MemDealer {
    identity: Bytes,
    to_router: mpsc::UnboundedSender<(Bytes, Vec<Bytes>)>,
    from_router: mpsc::UnboundedReceiver<Vec<Bytes>>,
}

impl MemDealer {
    pub fn identity(&self) -> &Bytes {
        &self.identity
    }

    pub async fn send(&mut self, frames: Vec<Bytes>) -> Result<(), TransportError> {
        self.to_router
            .send((self.identity.clone(), frames))
            .map_err(|_| TransportError::Closed)
    }

    pub async fn recv(&mut self) -> Result<Vec<Bytes>, TransportError> {
        self.from_router.recv().await.ok_or(TransportError::Closed)
    }

    pub async fn try_recv(&mut self) -> Result<Option<Vec<Bytes>>, TransportError> {
        match self.from_router.try_recv() {
            Ok(frames) => Ok(Some(frames)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
