use std::time::Instant;

use bytes::Bytes;

/// A locally signed-in component: an opaque transport identity and the
/// last time anything was heard from it.
#[derive(Debug, Clone)]
pub struct ComponentRecord {
    pub identity: Bytes,
    pub last_heartbeat: Instant,
}

impl ComponentRecord {
    pub fn new(identity: Bytes) -> Self {
        Self { identity, last_heartbeat: Instant::now() }
    }
}
