use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use bytes::Bytes;
use relay_rpc::{ErrorCode, RpcErrorObject};
use relay_wire::FullName;

use crate::component::ComponentRecord;
use crate::error::{CommunicationError, DirectoryError};
use crate::peer::{PeerId, PeerSlot};

/// Extra facts about an inbound frame needed to classify it during
/// `update_heartbeat`, pre-extracted by the caller (the coordinator already
/// has to parse the envelope to route it, so the directory is handed the
/// answers rather than re-parsing JSON itself).
pub struct HeartbeatContext<'a> {
    pub sender: &'a FullName,
    pub is_own_namespace: bool,
    pub rpc_method: Option<&'a str>,
}

/// Everything the expiration sweep decided to do.
#[derive(Debug, Default, Clone)]
pub struct ExpirationReport {
    pub components_to_ping: Vec<(String, Bytes)>,
    pub components_removed: Vec<String>,
    pub peers_to_ping: Vec<PeerId>,
    pub peers_removed: Vec<PeerId>,
    pub waiting_abandoned: Vec<String>,
}

/// Directory state owned exclusively by one Coordinator: local components,
/// federated peers (outbound/inbound halves), waiting outbound sign-ins,
/// and gossiped peer membership.
pub struct Directory {
    namespace: String,
    address: String,
    components: HashMap<String, ComponentRecord>,
    peers: HashMap<PeerId, PeerSlot>,
    next_peer_id: PeerId,
    nodes: HashMap<String, PeerId>,
    node_ids: HashMap<Bytes, PeerId>,
    waiting_nodes: HashMap<String, PeerId>,
    global_directory: HashMap<String, Vec<String>>,
}

impl Directory {
    pub fn new(namespace: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            address: address.into(),
            components: HashMap::new(),
            peers: HashMap::new(),
            next_peer_id: 0,
            nodes: HashMap::new(),
            node_ids: HashMap::new(),
            waiting_nodes: HashMap::new(),
            global_directory: HashMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn full_name(&self) -> String {
        format!("{}.COORDINATOR", self.namespace)
    }

    fn next_id(&mut self) -> PeerId {
        let id = self.next_peer_id;
        self.next_peer_id += 1;
        id
    }

    // ---- components -----------------------------------------------------

    pub fn add_component(&mut self, name: &str, identity: Bytes) -> Result<(), DirectoryError> {
        match self.components.get_mut(name) {
            None => {
                self.components.insert(name.to_string(), ComponentRecord::new(identity));
                Ok(())
            }
            Some(existing) if existing.identity == identity => {
                existing.last_heartbeat = Instant::now();
                Ok(())
            }
            Some(_) => Err(DirectoryError::DuplicateName { name: name.to_string() }),
        }
    }

    pub fn remove_component(&mut self, name: &str, identity: Option<&Bytes>) -> Result<(), DirectoryError> {
        if let Some(existing) = self.components.get(name) {
            if let Some(identity) = identity {
                if &existing.identity != identity {
                    return Err(DirectoryError::IdentityMismatch);
                }
            }
            self.components.remove(name);
        }
        Ok(())
    }

    pub fn component_identity(&self, name: &str) -> Option<&Bytes> {
        self.components.get(name).map(|c| &c.identity)
    }

    pub fn component_names(&self) -> Vec<String> {
        self.components.keys().cloned().collect()
    }

    // ---- outbound / inbound peers ----------------------------------------

    /// Normalize `address` by appending `default_port` when no port is
    /// present.
    pub fn normalize_address(address: &str, default_port: u16) -> String {
        if address.contains(':') {
            address.to_string()
        } else {
            format!("{address}:{default_port}")
        }
    }

    pub fn add_outbound_node(&mut self, namespace: &str, address: &str) -> Result<PeerId, DirectoryError> {
        if address == self.address {
            return Err(DirectoryError::UnknownAddressOwnHost);
        }
        if self.nodes.contains_key(namespace) {
            return Err(DirectoryError::NamespaceAlreadyConnected { namespace: namespace.to_string() });
        }
        if self.waiting_nodes.contains_key(address) {
            return Err(DirectoryError::AddressAlreadyWaiting { address: address.to_string() });
        }
        let id = self.next_id();
        self.peers.insert(id, PeerSlot::outbound(namespace, address));
        self.waiting_nodes.insert(address.to_string(), id);
        Ok(id)
    }

    /// Promote a waiting outbound sign-in to a connected peer once its
    /// `coordinator_sign_in` succeeds, combining with any inbound half
    /// already registered under the same namespace.
    pub fn promote_waiting(&mut self, address: &str, final_namespace: &str) -> Option<PeerId> {
        let id = self.waiting_nodes.remove(address)?;
        if let Some(slot) = self.peers.get_mut(&id) {
            slot.namespace = Some(final_namespace.to_string());
            slot.last_heartbeat = Instant::now();
        }

        if let Some(combine_id) = self.find_inbound_slot_for_namespace(final_namespace, id) {
            if let Some(old_slot) = self.peers.remove(&combine_id) {
                if let Some(identity) = old_slot.inbound_identity.clone() {
                    if let Some(slot) = self.peers.get_mut(&id) {
                        slot.inbound_identity = Some(identity.clone());
                    }
                    self.node_ids.insert(identity, id);
                }
            }
        }

        self.nodes.insert(final_namespace.to_string(), id);
        Some(id)
    }

    /// Drop a waiting outbound sign-in whose response was an error.
    pub fn drop_waiting(&mut self, address: &str) {
        if let Some(id) = self.waiting_nodes.remove(address) {
            self.peers.remove(&id);
        }
    }

    fn find_inbound_slot_for_namespace(&self, namespace: &str, exclude: PeerId) -> Option<PeerId> {
        self.peers
            .iter()
            .find(|(&id, slot)| {
                id != exclude && slot.namespace.as_deref() == Some(namespace) && slot.inbound_identity.is_some()
            })
            .map(|(&id, _)| id)
    }

    pub fn add_inbound_node(&mut self, identity: Bytes, namespace: &str) -> Result<PeerId, DirectoryError> {
        if let Some(&existing_id) = self.node_ids.get(&identity) {
            let matches = self
                .peers
                .get(&existing_id)
                .map(|slot| slot.namespace.as_deref() == Some(namespace))
                .unwrap_or(false);
            return if matches { Ok(existing_id) } else { Err(DirectoryError::IdentityMismatch) };
        }

        if let Some(&outbound_id) = self.nodes.get(namespace) {
            if let Some(slot) = self.peers.get_mut(&outbound_id) {
                slot.inbound_identity = Some(identity.clone());
                slot.last_heartbeat = Instant::now();
            }
            self.node_ids.insert(identity, outbound_id);
            return Ok(outbound_id);
        }

        let id = self.next_id();
        self.peers.insert(id, PeerSlot::inbound(namespace, identity.clone()));
        self.node_ids.insert(identity, id);
        Ok(id)
    }

    pub fn remove_node(&mut self, namespace: &str, identity: &Bytes) -> Result<(), DirectoryError> {
        let by_namespace = self.nodes.get(namespace).copied();
        let by_identity = self.node_ids.get(identity).copied();
        if let (Some(a), Some(b)) = (by_namespace, by_identity) {
            if a != b {
                return Err(DirectoryError::IdentityMismatch);
            }
        }
        let Some(id) = by_namespace.or(by_identity) else { return Ok(()) };
        self.nodes.retain(|_, v| *v != id);
        self.node_ids.retain(|_, v| *v != id);
        self.peers.remove(&id);
        Ok(())
    }

    pub fn peer(&self, id: PeerId) -> Option<&PeerSlot> {
        self.peers.get(&id)
    }

    pub fn peer_id_for_namespace(&self, namespace: &str) -> Option<PeerId> {
        self.nodes.get(namespace).copied()
    }

    pub fn peer_id_for_identity(&self, identity: &Bytes) -> Option<PeerId> {
        self.node_ids.get(identity).copied()
    }

    /// `{namespace: address}` map of every connected outbound peer, plus
    /// this coordinator's own entry.
    pub fn nodes_as_map(&self) -> HashMap<String, String> {
        let mut map: HashMap<String, String> = self
            .nodes
            .iter()
            .filter_map(|(ns, id)| self.peers.get(id).and_then(|s| s.address.clone()).map(|a| (ns.clone(), a)))
            .collect();
        map.insert(self.namespace.clone(), self.address.clone());
        map
    }

    pub fn record_components(&mut self, namespace: &str, names: Vec<String>) {
        self.global_directory.insert(namespace.to_string(), names);
    }

    /// `{namespace: [names]}` for every peer we have gossip about, plus our
    /// own local component names.
    pub fn global_components(&self) -> HashMap<String, Vec<String>> {
        let mut map = self.global_directory.clone();
        map.insert(self.namespace.clone(), self.component_names());
        map
    }

    // ---- heartbeats -------------------------------------------------------

    pub fn update_heartbeat(&mut self, identity: &Bytes, ctx: HeartbeatContext<'_>) -> Result<(), CommunicationError> {
        if ctx.is_own_namespace {
            match self.components.get_mut(&ctx.sender.local) {
                Some(existing) => {
                    if &existing.identity != identity {
                        return Err(CommunicationError(
                            RpcErrorObject::from(ErrorCode::DuplicateName)
                                .with_data(serde_json::Value::from(ctx.sender.local.clone())),
                        ));
                    }
                    existing.last_heartbeat = Instant::now();
                    Ok(())
                }
                None => {
                    let allowed = matches!(ctx.rpc_method, None | Some("sign_in") | Some("sign_out"));
                    if allowed {
                        Ok(())
                    } else {
                        Err(Self::not_signed_in(ctx.sender))
                    }
                }
            }
        } else if let Some(&id) = self.node_ids.get(identity) {
            if let Some(slot) = self.peers.get_mut(&id) {
                slot.last_heartbeat = Instant::now();
            }
            Ok(())
        } else if ctx.sender.local == "COORDINATOR"
            && matches!(ctx.rpc_method, Some("coordinator_sign_in") | Some("coordinator_sign_out"))
        {
            Ok(())
        } else {
            Err(Self::not_signed_in(ctx.sender))
        }
    }

    fn not_signed_in(sender: &FullName) -> CommunicationError {
        CommunicationError(
            RpcErrorObject::from(ErrorCode::NotSignedIn).with_data(serde_json::Value::from(sender.to_string())),
        )
    }

    // ---- expiration ---------------------------------------------------

    pub fn expire(&mut self, expiration_time: Duration) -> ExpirationReport {
        let now = Instant::now();
        let mut report = ExpirationReport::default();

        let mut components_remove = Vec::new();
        for (name, comp) in self.components.iter() {
            let idle = now.duration_since(comp.last_heartbeat);
            if idle > expiration_time * 3 {
                components_remove.push(name.clone());
            } else if idle > expiration_time {
                report.components_to_ping.push((name.clone(), comp.identity.clone()));
            }
        }
        for name in components_remove {
            self.components.remove(&name);
            report.components_removed.push(name);
        }

        let waiting_ids: HashSet<PeerId> = self.waiting_nodes.values().copied().collect();
        let mut peers_remove = Vec::new();
        for (&id, slot) in self.peers.iter() {
            let idle = now.duration_since(slot.last_heartbeat);
            if waiting_ids.contains(&id) {
                if idle > expiration_time * 3 {
                    peers_remove.push(id);
                }
            } else if idle > expiration_time * 3 {
                peers_remove.push(id);
            } else if idle > expiration_time {
                report.peers_to_ping.push(id);
            }
        }

        for id in peers_remove {
            if let Some(slot) = self.peers.get(&id) {
                if let Some(address) = &slot.address {
                    if self.waiting_nodes.get(address) == Some(&id) {
                        self.waiting_nodes.remove(address);
                        report.waiting_abandoned.push(address.clone());
                    }
                }
                if let Some(namespace) = &slot.namespace {
                    self.nodes.remove(namespace);
                }
            }
            self.node_ids.retain(|_, v| *v != id);
            self.peers.remove(&id);
            report.peers_removed.push(id);
        }

        report
    }
}

/// Whether `sender`'s namespace refers to this coordinator (empty or an
/// explicit match), used to pick the local-delivery branch before calling
/// `update_heartbeat`.
pub fn classify_sender(sender: &FullName, own_namespace: &str) -> bool {
    sender.namespace.is_empty() || sender.namespace == own_namespace
}
