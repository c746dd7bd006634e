use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relay_core::transport::{Dealer, Router};
use relay_core::{classify_sender, Directory, HeartbeatContext, PeerId};
use relay_rpc::{ErrorCode, Request, RequestPayload, Response, RpcErrorObject, RpcGenerator};
use relay_wire::{split_name, Envelope, MessageType};

use crate::error::NodeError;

/// Default port a Coordinator's router listens on, matching the well-known
/// control-plane port in the wire-level external interface.
pub const DEFAULT_COORDINATOR_PORT: u16 = 12300;

/// Routes messages among connected Components and federated Coordinators.
///
/// Owns exactly one `Router` (accepting local Components and inbound peer
/// connections) plus one `Dealer` per outbound peer it has dialed. Replies to
/// any inbound call go straight back out the router to the identity the call
/// arrived on — unlike the original, which re-routed a coordinator-to-
/// coordinator reply through the peer's own outbound connection by mutating
/// the inbound sender in place, there is no such shared mutable message
/// object here, and the inbound identity is always sufficient to answer.
pub struct Coordinator {
    namespace: String,
    directory: Directory,
    router: Router,
    peer_dealers: HashMap<PeerId, Dealer>,
    rpc_generator: RpcGenerator,
    closed: bool,
}

impl Coordinator {
    pub fn new(namespace: impl Into<String>, address: impl Into<String>, router: Router) -> Self {
        let namespace = namespace.into();
        let address = address.into();
        Self {
            directory: Directory::new(namespace.clone(), address),
            namespace,
            router,
            peer_dealers: HashMap::new(),
            rpc_generator: RpcGenerator::new(),
            closed: false,
        }
    }

    pub fn full_name(&self) -> String {
        self.directory.full_name()
    }

    fn full_name_bytes(&self) -> Bytes {
        Bytes::from(self.full_name().into_bytes())
    }

    /// Dial an outbound peer Coordinator and start its sign-in handshake.
    /// `dealer` must already be connected to `address`.
    pub async fn connect_to_coordinator(&mut self, address: &str, mut dealer: Dealer) -> Result<(), NodeError> {
        let address = Directory::normalize_address(address, DEFAULT_COORDINATOR_PORT);
        let id = self
            .directory
            .add_outbound_node("", &address)
            .map_err(|e| NodeError::Rpc(RpcErrorObject::new(ErrorCode::ServerError as i64, e.to_string())))?;

        let request = self.rpc_generator.build_request("coordinator_sign_in", ());
        let body = serde_json::to_vec(&request).expect("request serializes");
        let envelope = Envelope::new(Bytes::from_static(b"COORDINATOR"), self.full_name_bytes(), MessageType::Json)
            .with_payload(vec![body.into()]);
        dealer.send(envelope.encode()?).await?;
        self.peer_dealers.insert(id, dealer);
        Ok(())
    }

    /// Route messages until `stop` is set. `poll_interval` bounds how long
    /// each router poll blocks; `cleaning_interval`/`expiration_time` drive
    /// the heartbeat sweep.
    pub async fn run(&mut self, stop: Arc<AtomicBool>, poll_interval: Duration, cleaning_interval: Duration, expiration_time: Duration) {
        tracing::info!(namespace = %self.namespace, "coordinator routing started");
        let mut next_clean = tokio::time::Instant::now() + cleaning_interval;

        while !stop.load(Ordering::Relaxed) {
            match tokio::time::timeout(poll_interval, self.router.recv()).await {
                Ok(Ok((identity, frames))) => self.read_and_route(identity, frames).await,
                Ok(Err(e)) => tracing::error!(error = %e, "router recv failed"),
                Err(_elapsed) => {}
            }
            self.check_waiting_nodes().await;

            if tokio::time::Instant::now() > next_clean {
                self.remove_expired_addresses(expiration_time).await;
                next_clean = tokio::time::Instant::now() + cleaning_interval;
            }
        }

        self.close().await;
    }

    async fn read_and_route(&mut self, identity: Bytes, frames: Vec<Bytes>) {
        let message = match Envelope::decode(&frames) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "not enough frames to decode an envelope");
                return;
            }
        };
        self.deliver_message(Some(identity), message).await;
    }

    /// Poll outbound dealers still waiting on a `coordinator_sign_in` reply
    /// (non-blocking), matching `check_unfinished_node_connections`.
    async fn check_waiting_nodes(&mut self) {
        let ids: Vec<PeerId> = self.peer_dealers.keys().copied().collect();
        for id in ids {
            let Some(dealer) = self.peer_dealers.get_mut(&id) else { continue };
            let Ok(Some(frames)) = dealer.try_recv().await else { continue };
            let Ok(message) = Envelope::decode(&frames) else { continue };
            self.handle_waiting_node_reply(id, message).await;
        }
    }

    async fn handle_waiting_node_reply(&mut self, id: PeerId, message: Envelope) {
        let Some(address) = self.directory.peer(id).and_then(|slot| slot.address.clone()) else { return };
        let Some(Ok(body)) = message.json_body() else {
            tracing::warn!(?address, "unknown message from waiting node dealer");
            return;
        };
        if body.get("result").map(|r| r.is_null()).unwrap_or(false) {
            let final_namespace = split_name(&message.sender, "").namespace;
            tracing::info!(%final_namespace, %address, "coordinator sign-in to remote peer completed");
            self.directory.promote_waiting(&address, &final_namespace);
            self.publish_directory_update_to(id).await;
        } else if let Some(error) = body.get("error") {
            tracing::error!(%address, ?error, "coordinator sign-in to remote peer failed");
            self.directory.drop_waiting(&address);
            self.peer_dealers.remove(&id);
        }
    }

    /// Deliver one message, whether it arrived from the router (local
    /// Component or inbound peer, `sender_identity = Some`) or originated
    /// locally within the Coordinator itself (`sender_identity = None`,
    /// skips the heartbeat check).
    async fn deliver_message(&mut self, sender_identity: Option<Bytes>, message: Envelope) {
        if let Some(identity) = &sender_identity {
            let sender = split_name(&message.sender, "");
            let is_own = classify_sender(&sender, &self.namespace);
            let rpc_method = extract_rpc_method(&message);
            let ctx = HeartbeatContext { sender: &sender, is_own_namespace: is_own, rpc_method: rpc_method.as_deref() };
            if let Err(err) = self.directory.update_heartbeat(identity, ctx) {
                self.reply_error(identity.clone(), &message, err.0).await;
                return;
            }
        }

        let own_full_name = self.full_name_bytes();
        if message.receiver.as_ref() == b"COORDINATOR" || message.receiver == own_full_name {
            self.handle_commands(sender_identity, message).await;
            return;
        }

        let receiver = split_name(&message.receiver, "");
        if receiver.namespace.is_empty() || receiver.namespace == self.namespace {
            self.deliver_locally(message).await;
        } else {
            self.deliver_remotely(message).await;
        }
    }

    async fn deliver_locally(&mut self, message: Envelope) {
        let receiver = split_name(&message.receiver, "");
        let Some(identity) = self.directory.component_identity(&receiver.local).cloned() else {
            tracing::error!(receiver = %message.receiver.escape_ascii(), "receiver is not in the addresses list");
            self.send_error_to_sender(&message, ErrorCode::ReceiverUnknown, receiver.local).await;
            return;
        };
        if let Err(e) = self.router.send(&identity, message.encode().unwrap_or_default()).await {
            tracing::error!(error = %e, "failed delivering message locally");
        }
    }

    async fn deliver_remotely(&mut self, message: Envelope) {
        let receiver = split_name(&message.receiver, "");
        let Some(id) = self.directory.peer_id_for_namespace(&receiver.namespace) else {
            self.send_error_to_sender(&message, ErrorCode::NodeUnknown, receiver.namespace).await;
            return;
        };
        let Some(dealer) = self.peer_dealers.get_mut(&id) else {
            self.send_error_to_sender(&message, ErrorCode::NodeUnknown, receiver.namespace).await;
            return;
        };
        if let Err(e) = dealer.send(message.encode().unwrap_or_default()).await {
            tracing::error!(error = %e, "failed delivering message to remote node");
        }
    }

    async fn send_error_to_sender(&mut self, original: &Envelope, code: ErrorCode, data: impl Into<String>) {
        let response = Response::failure(
            serde_json::Value::Null,
            RpcErrorObject::from(code).with_data(serde_json::Value::from(data.into())),
        );
        let Ok(body) = serde_json::to_vec(&response) else { return };
        let reply = Envelope::new(original.sender.clone(), self.full_name_bytes(), MessageType::Json)
            .with_conversation_id(original.conversation_id)
            .with_payload(vec![body.into()]);
        let receiver = split_name(&reply.receiver, "");
        if receiver.namespace.is_empty() || receiver.namespace == self.namespace {
            self.deliver_locally(reply).await;
        } else {
            self.deliver_remotely(reply).await;
        }
    }

    async fn reply_error(&mut self, identity: Bytes, original: &Envelope, error: RpcErrorObject) {
        let response = Response::failure(serde_json::Value::Null, error);
        let Ok(body) = serde_json::to_vec(&response) else { return };
        let reply = Envelope::new(original.sender.clone(), self.full_name_bytes(), MessageType::Json)
            .with_conversation_id(original.conversation_id)
            .with_payload(vec![body.into()]);
        if let Err(e) = self.router.send(&identity, reply.encode().unwrap_or_default()).await {
            tracing::error!(error = %e, "failed replying with error");
        }
    }

    async fn handle_commands(&mut self, sender_identity: Option<Bytes>, message: Envelope) {
        if message.payload.is_empty() {
            return; // bare heartbeat
        }
        match message.message_type {
            MessageType::Json => self.handle_json_commands(sender_identity, message).await,
            other => tracing::error!(sender = %message.sender.escape_ascii(), message_type = ?other, "unknown message type received"),
        }
    }

    async fn handle_json_commands(&mut self, sender_identity: Option<Bytes>, message: Envelope) {
        let Some(raw) = message.payload.first() else { return };
        let payload = match RequestPayload::parse(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, sender = %message.sender.escape_ascii(), "invalid json message received");
                return;
            }
        };
        match payload {
            RequestPayload::Single(value) => self.handle_rpc_value(sender_identity, &message, value).await,
            RequestPayload::Batch(items) => {
                for item in items {
                    self.handle_rpc_value(sender_identity.clone(), &message, item).await;
                }
            }
        }
    }

    async fn handle_rpc_value(&mut self, sender_identity: Option<Bytes>, message: &Envelope, value: serde_json::Value) {
        if value.get("method").is_some() {
            let request: Request = match serde_json::from_value(value) {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(error = %e, "invalid json-rpc request");
                    return;
                }
            };
            self.handle_rpc_call(sender_identity, message, request).await;
        } else if value.get("error").is_some() {
            tracing::error!(sender = %message.sender.escape_ascii(), ?value, "error message received");
        } else if value.get("result").is_some() {
            tracing::info!(sender = %message.sender.escape_ascii(), "unexpected result received");
        } else {
            tracing::error!(sender = %message.sender.escape_ascii(), "invalid json-rpc message received");
        }
    }

    async fn handle_rpc_call(&mut self, sender_identity: Option<Bytes>, message: &Envelope, request: Request) {
        let sender = split_name(&message.sender, "");

        // coordinator_sign_in needs the raw router identity (not yet in the
        // directory under any namespace), so it is answered directly rather
        // than through the generic dispatch table.
        if request.method == "coordinator_sign_in" {
            if let Some(identity) = sender_identity {
                self.handle_coordinator_sign_in(identity, &sender.namespace, message.conversation_id).await;
            }
            return;
        }

        let is_notification = request.is_notification();
        let id = request.id.clone().unwrap_or(serde_json::Value::Null);
        let outcome = self.dispatch_coordinator_method(sender_identity.clone(), &sender, &request).await;

        if is_notification {
            if let Err(err) = outcome {
                tracing::warn!(method = %request.method, error = %err, "error handling notification");
            }
            return;
        }

        let response = match outcome {
            Ok(result) => Response::success(id, result),
            Err(err) => Response::failure(id, err),
        };
        let Ok(body) = serde_json::to_vec(&response) else { return };
        let reply = Envelope::new(message.sender.clone(), self.full_name_bytes(), MessageType::Json)
            .with_conversation_id(message.conversation_id)
            .with_payload(vec![body.into()]);

        if let Some(identity) = sender_identity {
            if let Err(e) = self.router.send(&identity, reply.encode().unwrap_or_default()).await {
                tracing::error!(error = %e, "failed sending rpc reply");
            }
        }
    }

    async fn dispatch_coordinator_method(
        &mut self,
        sender_identity: Option<Bytes>,
        sender: &relay_wire::FullName,
        request: &Request,
    ) -> Result<serde_json::Value, RpcErrorObject> {
        use serde_json::Value;

        match request.method.as_str() {
            "pong" => Ok(Value::Null),
            "set_log_level" => {
                let level = param_string(request, 0, "level")?;
                let Ok(level) = level.parse::<tracing::Level>() else {
                    return Err(RpcErrorObject::new(ErrorCode::InvalidParams as i64, format!("unknown level {level}")));
                };
                tracing::info!(%level, "log level change requested");
                Ok(Value::Null)
            }
            "shut_down" => {
                self.sign_out_from_all_peers().await;
                Ok(Value::Null)
            }
            "rpc.discover" => Ok(self.discover_admin_methods()),
            "sign_in" => {
                let Some(identity) = sender_identity else {
                    return Err(RpcErrorObject::new(ErrorCode::ServerError as i64, "sign_in requires a transport identity"));
                };
                self.directory
                    .add_component(&sender.local, identity)
                    .map_err(|e| RpcErrorObject::new(ErrorCode::DuplicateName as i64, e.to_string()))?;
                tracing::info!(name = %sender.local, "new component signed in");
                Ok(Value::Null)
            }
            "sign_out" => {
                self.directory
                    .remove_component(&sender.local, sender_identity.as_ref())
                    .map_err(|e| RpcErrorObject::new(ErrorCode::ServerError as i64, e.to_string()))?;
                tracing::info!(name = %sender.local, "component signed out");
                Ok(Value::Null)
            }
            "coordinator_sign_out" => {
                if sender.local != "COORDINATOR" {
                    return Err(RpcErrorObject::new(ErrorCode::InvalidRequest as i64, "only coordinators may sign out as coordinators"));
                }
                let Some(identity) = sender_identity else {
                    return Err(Self::not_signed_in_as(&sender.namespace));
                };
                let claimed = self.directory.peer_id_for_namespace(&sender.namespace);
                if claimed.is_none() || claimed != self.directory.peer_id_for_identity(&identity) {
                    return Err(Self::not_signed_in_as(&sender.namespace));
                }
                if let Some(id) = claimed {
                    self.peer_dealers.remove(&id);
                }
                self.directory
                    .remove_node(&sender.namespace, &identity)
                    .map_err(|e| RpcErrorObject::new(ErrorCode::ServerError as i64, e.to_string()))?;
                Ok(Value::Null)
            }
            "add_nodes" => {
                let nodes = param_map(request, 0, "nodes")?;
                for (namespace, address) in nodes {
                    let Some(address) = address.as_str() else { continue };
                    if namespace == self.namespace || address == self.directory.address() {
                        continue;
                    }
                    // best-effort: connecting requires a transport handle the
                    // caller must supply; record-only until dialed externally.
                    let _ = self.directory.add_outbound_node(&namespace, address);
                }
                Ok(Value::Null)
            }
            "send_nodes" => Ok(serde_json::to_value(self.directory.nodes_as_map()).unwrap_or(Value::Null)),
            "record_components" => {
                let components = param_string_list(request, 0, "components")?;
                self.directory.record_components(&sender.namespace, components);
                Ok(Value::Null)
            }
            "send_local_components" => Ok(serde_json::to_value(self.directory.component_names()).unwrap_or(Value::Null)),
            "send_global_components" => Ok(serde_json::to_value(self.directory.global_components()).unwrap_or(Value::Null)),
            "remove_expired_addresses" => {
                let seconds = param_value(request, 0, "expiration_time").ok().and_then(|v| v.as_f64()).unwrap_or(15.0);
                self.remove_expired_addresses(Duration::from_secs_f64(seconds)).await;
                Ok(Value::Null)
            }
            other => Err(RpcErrorObject::from(ErrorCode::MethodNotFound).with_data(Value::from(other))),
        }
    }

    fn not_signed_in_as(namespace: &str) -> RpcErrorObject {
        RpcErrorObject::from(ErrorCode::NotSignedIn).with_data(serde_json::Value::from(namespace.to_string()))
    }

    /// Static description of the admin method table, served in place of the
    /// generic `RpcServer::discover` since the Coordinator dispatches these
    /// by hand rather than through a registered method table.
    fn discover_admin_methods(&self) -> serde_json::Value {
        const METHODS: &[&str] = &[
            "pong",
            "set_log_level",
            "shut_down",
            "rpc.discover",
            "sign_in",
            "sign_out",
            "coordinator_sign_in",
            "coordinator_sign_out",
            "add_nodes",
            "send_nodes",
            "record_components",
            "send_local_components",
            "send_global_components",
            "remove_expired_addresses",
        ];
        serde_json::json!({ "methods": METHODS })
    }

    /// Handle an inbound `coordinator_sign_in`: registers the dialing peer's
    /// identity under its claimed namespace and answers directly via the
    /// router, bypassing the rest of `dispatch_coordinator_method` because
    /// this is the one call that needs the raw router identity rather than
    /// just the parsed sender name.
    async fn handle_coordinator_sign_in(&mut self, identity: Bytes, sender_namespace: &str, conversation_id: [u8; 16]) {
        let result = self.directory.add_inbound_node(identity.clone(), sender_namespace);
        let response = match result {
            Ok(_) => Response::success(serde_json::Value::Null, serde_json::Value::Null),
            Err(e) => Response::failure(serde_json::Value::Null, RpcErrorObject::new(ErrorCode::ServerError as i64, e.to_string())),
        };
        let Ok(body) = serde_json::to_vec(&response) else { return };
        let reply = Envelope::new(Bytes::from(format!("{sender_namespace}.COORDINATOR").into_bytes()), self.full_name_bytes(), MessageType::Json)
            .with_conversation_id(conversation_id)
            .with_payload(vec![body.into()]);
        if let Err(e) = self.router.send(&identity, reply.encode().unwrap_or_default()).await {
            tracing::error!(error = %e, "failed replying to coordinator sign-in");
        }
        if result.is_ok() {
            self.send_current_nodes_and_components(&identity).await;
        }
    }

    async fn send_current_nodes_and_components(&mut self, identity: &Bytes) {
        let nodes_req = self.rpc_generator.build_notification("add_nodes", serde_json::json!({ "nodes": self.directory.nodes_as_map() }));
        let components_req = self.rpc_generator.build_notification(
            "record_components",
            serde_json::json!({ "components": self.directory.component_names() }),
        );
        let batch = serde_json::to_vec(&vec![nodes_req, components_req]).expect("batch serializes");
        let envelope = Envelope::new(Bytes::from_static(b"COORDINATOR"), self.full_name_bytes(), MessageType::Json)
            .with_payload(vec![batch.into()]);
        if let Err(e) = self.router.send(identity, envelope.encode().unwrap_or_default()).await {
            tracing::error!(error = %e, "failed sending initial directory snapshot");
        }
    }

    /// Push a full nodes+components snapshot to one newly-connected peer,
    /// matching the gossip `add_nodes`+`record_components` batch sent right
    /// after a sign-in handshake completes.
    async fn publish_directory_update_to(&mut self, id: PeerId) {
        let nodes = self.directory.nodes_as_map();
        let components = self.directory.component_names();
        let nodes_req = self.rpc_generator.build_notification("add_nodes", serde_json::json!({ "nodes": nodes }));
        let components_req = self.rpc_generator.build_notification("record_components", serde_json::json!({ "components": components }));
        let Ok(batch) = serde_json::to_vec(&vec![nodes_req, components_req]) else { return };
        let envelope = Envelope::new(Bytes::from_static(b"COORDINATOR"), self.full_name_bytes(), MessageType::Json)
            .with_payload(vec![batch.into()]);
        let Ok(frames) = envelope.encode() else { return };
        if let Some(dealer) = self.peer_dealers.get_mut(&id) {
            if let Err(e) = dealer.send(frames).await {
                tracing::error!(error = %e, "failed publishing directory update");
            }
        }
    }

    /// Sweep components and peers for missed heartbeats, pinging those past
    /// the single-interval threshold and dropping those past the triple
    /// threshold.
    pub async fn remove_expired_addresses(&mut self, expiration_time: Duration) {
        let report = self.directory.expire(expiration_time);

        let ping = self.rpc_generator.build_notification("pong", ());
        let Ok(ping_body) = serde_json::to_vec(&ping) else { return };

        for (_name, identity) in report.components_to_ping {
            let envelope = Envelope::new(identity.clone(), self.full_name_bytes(), MessageType::Json)
                .with_payload(vec![ping_body.clone().into()]);
            if let Ok(frames) = envelope.encode() {
                let _ = self.router.send(&identity, frames).await;
            }
        }

        for id in report.peers_to_ping {
            if let Some(dealer) = self.peer_dealers.get_mut(&id) {
                let envelope = Envelope::new(Bytes::from_static(b"COORDINATOR"), self.full_name_bytes(), MessageType::Json)
                    .with_payload(vec![ping_body.clone().into()]);
                if let Ok(frames) = envelope.encode() {
                    let _ = dealer.send(frames).await;
                }
            }
        }

        for id in report.peers_removed {
            self.peer_dealers.remove(&id);
        }

        if !report.components_removed.is_empty() || !report.waiting_abandoned.is_empty() {
            tracing::info!(removed = ?report.components_removed, abandoned = ?report.waiting_abandoned, "expiration sweep");
        }
    }

    async fn sign_out_from_all_peers(&mut self) {
        let ids: Vec<PeerId> = self.peer_dealers.keys().copied().collect();
        let sign_out = self.rpc_generator.build_notification("coordinator_sign_out", ());
        let Ok(body) = serde_json::to_vec(&sign_out) else { return };
        for id in ids {
            if let Some(dealer) = self.peer_dealers.get_mut(&id) {
                let envelope = Envelope::new(Bytes::from_static(b"COORDINATOR"), self.full_name_bytes(), MessageType::Json)
                    .with_payload(vec![body.clone().into()]);
                if let Ok(frames) = envelope.encode() {
                    let _ = dealer.send(frames).await;
                }
                let _ = dealer.close().await;
            }
        }
        self.peer_dealers.clear();
    }

    /// Sign out of every peer, close the router, matching `Coordinator::close`.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        tracing::debug!("closing coordinator");
        self.sign_out_from_all_peers().await;
        let _ = self.router.close().await;
        tracing::info!(name = %self.full_name(), "coordinator closed");
        self.closed = true;
    }
}

fn extract_rpc_method(message: &Envelope) -> Option<String> {
    let body = message.json_body()?.ok()?;
    body.get("method").and_then(|m| m.as_str()).map(str::to_string)
}

fn param_string(request: &Request, index: usize, name: &str) -> Result<String, RpcErrorObject> {
    param_value(request, index, name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RpcErrorObject::new(ErrorCode::InvalidParams as i64, format!("`{name}` must be a string")))
}

fn param_map(request: &Request, index: usize, name: &str) -> Result<Vec<(String, serde_json::Value)>, RpcErrorObject> {
    let value = param_value(request, index, name)?;
    let Some(map) = value.as_object() else {
        return Err(RpcErrorObject::new(ErrorCode::InvalidParams as i64, format!("`{name}` must be an object")));
    };
    Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn param_string_list(request: &Request, index: usize, name: &str) -> Result<Vec<String>, RpcErrorObject> {
    let value = param_value(request, index, name)?;
    let Some(items) = value.as_array() else {
        return Err(RpcErrorObject::new(ErrorCode::InvalidParams as i64, format!("`{name}` must be an array")));
    };
    Ok(items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
}

fn param_value(request: &Request, index: usize, name: &str) -> Result<serde_json::Value, RpcErrorObject> {
    use relay_rpc::Params;
    match &request.params {
        Some(Params::Positional(items)) => items
            .get(index)
            .cloned()
            .ok_or_else(|| RpcErrorObject::new(ErrorCode::InvalidParams as i64, format!("missing `{name}`"))),
        Some(Params::Named(map)) => map
            .get(name)
            .cloned()
            .ok_or_else(|| RpcErrorObject::new(ErrorCode::InvalidParams as i64, format!("missing `{name}`"))),
        None => Err(RpcErrorObject::new(ErrorCode::InvalidParams as i64, format!("missing `{name}`"))),
    }
}
