use std::time::Instant;

use bytes::Bytes;

/// Unique handle into the directory's peer table. The same namespace can be
/// reached by its outbound half (`nodes`) and its inbound half (`node_ids`)
/// at once; both map onto the same `PeerId` once coalesced, so there is
/// never a pair of slots referencing each other directly (see the "cyclic
/// Peer reference" design note).
pub type PeerId = u64;

/// One federated peer Coordinator, addressable from either direction.
#[derive(Debug, Clone)]
pub struct PeerSlot {
    pub namespace: Option<String>,
    pub address: Option<String>,
    pub last_heartbeat: Instant,
    pub inbound_identity: Option<Bytes>,
    pub has_outbound: bool,
}

impl PeerSlot {
    pub fn outbound(namespace: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            address: Some(address.into()),
            last_heartbeat: Instant::now(),
            inbound_identity: None,
            has_outbound: true,
        }
    }

    pub fn inbound(namespace: impl Into<String>, identity: Bytes) -> Self {
        Self {
            namespace: Some(namespace.into()),
            address: None,
            last_heartbeat: Instant::now(),
            inbound_identity: Some(identity),
            has_outbound: false,
        }
    }

    pub fn is_combined(&self) -> bool {
        self.has_outbound && self.inbound_identity.is_some()
    }
}
