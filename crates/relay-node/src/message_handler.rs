use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relay_buffer::MessageBuffer;
use relay_core::transport::Dealer;
use relay_rpc::{BinaryContext, MethodError, RegistrationError, RequestPayload, RpcServer};
use relay_wire::{Envelope, MessageType};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::communicator::BaseCommunicator;
use crate::error::NodeError;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Whether an inbound JSON body is a request/notification, a response
/// carrying a result, or a response carrying an error. Mirrors PyLECO's
/// `get_json_content_type`, used to route an untagged message to the
/// right handler instead of assuming it is always a fresh request.
enum JsonContent {
    Request,
    Result,
    Error,
    Invalid,
}

fn classify_json(body: &serde_json::Value) -> JsonContent {
    if body.get("method").is_some() {
        JsonContent::Request
    } else if body.get("error").is_some() {
        JsonContent::Error
    } else if body.get("result").is_some() {
        JsonContent::Result
    } else {
        JsonContent::Invalid
    }
}

/// Owns the connection to a Coordinator and a method table, running a
/// listen loop that keeps signed in, answers JSON-RPC calls, and dispatches
/// anything else to overridable hooks. One component process typically owns
/// exactly one `MessageHandler`, driven from a single task/thread.
pub struct MessageHandler {
    communicator: BaseCommunicator,
    rpc: RpcServer,
    shutdown_requested: Arc<AtomicBool>,
}

impl MessageHandler {
    pub fn new(dealer: Dealer, name: impl Into<String>) -> Self {
        let name = name.into();
        let rpc = RpcServer::new(name.clone(), "1.0");
        let communicator = BaseCommunicator::new(dealer, name);
        let shutdown_requested = Arc::new(AtomicBool::new(false));
        let mut handler = Self { communicator, rpc, shutdown_requested };
        handler.register_core_methods();
        handler
    }

    fn register_core_methods(&mut self) {
        self.rpc
            .register::<(), (), _>("pong", Some("Answer a ping"), None, |_: ()| Ok(()))
            .expect("pong registers once");
        self.rpc
            .register::<String, (), _>(
                "set_log_level",
                Some("Set this component's log level"),
                None,
                |level: String| {
                    let Ok(level) = level.parse::<tracing::Level>() else {
                        return Err(MethodError::new(
                            relay_rpc::ErrorCode::InvalidParams as i64,
                            format!("unknown log level: {level}"),
                        ));
                    };
                    tracing::info!(%level, "log level change requested");
                    Ok(())
                },
            )
            .expect("set_log_level registers once");
        let shutdown_requested = Arc::clone(&self.shutdown_requested);
        self.rpc
            .register::<(), (), _>("shut_down", Some("Stop this component's listen loop"), None, move |_: ()| {
                shutdown_requested.store(true, Ordering::Relaxed);
                Ok(())
            })
            .expect("shut_down registers once");
    }

    /// Shared flag a `shut_down` call sets, checked by `listen` (and by
    /// `PipeHandler::listen`, which drives this handler from the outside)
    /// alongside the caller-supplied `stop` flag.
    pub(crate) fn shutdown_requested(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_requested)
    }

    /// Register a plain JSON-RPC method, forwarded to the inner server.
    pub fn register<P, R, F>(
        &mut self,
        name: impl Into<String>,
        summary: Option<&str>,
        description: Option<&str>,
        f: F,
    ) -> Result<(), RegistrationError>
    where
        P: DeserializeOwned,
        R: Serialize,
        F: Fn(P) -> Result<R, MethodError> + Send + Sync + 'static,
    {
        self.rpc.register(name, summary, description, f)
    }

    /// Register a binary-capable JSON-RPC method, forwarded to the inner
    /// server.
    pub fn register_binary<P, R, F>(
        &mut self,
        name: impl Into<String>,
        summary: Option<&str>,
        description: Option<&str>,
        accept_binary_input: bool,
        return_binary_output: bool,
        f: F,
    ) -> Result<(), RegistrationError>
    where
        P: DeserializeOwned,
        R: Serialize,
        F: Fn(P, &mut BinaryContext) -> Result<R, MethodError> + Send + Sync + 'static,
    {
        self.rpc.register_binary(name, summary, description, accept_binary_input, return_binary_output, f)
    }

    pub fn full_name(&self) -> String {
        self.communicator.full_name()
    }

    /// Handle to this handler's message buffer, for sharing with
    /// `CommunicatorPipe`s on other threads.
    pub fn buffer_handle(&self) -> Arc<MessageBuffer> {
        self.communicator.buffer_handle()
    }

    pub(crate) fn communicator_mut(&mut self) -> &mut BaseCommunicator {
        &mut self.communicator
    }

    /// Run a raw JSON-RPC request through the registered method table
    /// in-place, without going through the wire at all. Used by the pipe
    /// handler's `LOC` command: the caller thread hands over the raw bytes,
    /// the I/O thread runs them against the same method table a wire
    /// request would use, and the result is posted back through the shared
    /// buffer rather than the socket.
    pub(crate) fn process_local(&mut self, raw: &[u8]) -> Option<Vec<u8>> {
        let payload = RequestPayload::parse(raw).ok()?;
        let mut binary = BinaryContext::with_input(Vec::new());
        let response = self.rpc.process(payload, &mut binary)?;
        serde_json::to_vec(&response).ok()
    }

    /// Sign in, then poll the socket until `stop` is set, sending
    /// heartbeats on the configured interval and dispatching any message
    /// that isn't a bare heartbeat. Signs out on the way out, matching
    /// `_listen_setup`/`_listen_loop_element`/`_listen_close`.
    pub async fn listen(&mut self, stop: Arc<AtomicBool>, waiting_time: Duration) -> Result<(), NodeError> {
        tracing::info!(name = %self.full_name(), "starting to listen");
        self.communicator.sign_in().await?;

        let mut next_beat = tokio::time::Instant::now() + HEARTBEAT_INTERVAL;
        while !stop.load(Ordering::Relaxed) && !self.shutdown_requested.load(Ordering::Relaxed) {
            match self.communicator.read_message(None, waiting_time).await {
                Ok(envelope) => {
                    if envelope.payload.is_empty() {
                        continue;
                    }
                    self.handle_message(envelope).await;
                }
                Err(NodeError::Timeout) => {
                    if tokio::time::Instant::now() > next_beat {
                        self.communicator.heartbeat().await?;
                        next_beat = tokio::time::Instant::now() + HEARTBEAT_INTERVAL;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(name = %self.full_name(), "stopping listen loop");
        self.communicator.sign_out().await
    }

    pub(crate) async fn handle_message(&mut self, envelope: Envelope) {
        match envelope.message_type {
            MessageType::Json => self.handle_json_message(envelope).await,
            other => {
                tracing::warn!(sender = ?envelope.sender, message_type = ?other, "unknown message type received");
            }
        }
    }

    async fn handle_json_message(&mut self, envelope: Envelope) {
        let Some(body) = envelope.payload.first() else { return };
        let parsed: serde_json::Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "could not decode json message");
                return;
            }
        };

        match classify_json(&parsed) {
            JsonContent::Request => self.handle_json_request(envelope).await,
            JsonContent::Error => self.handle_json_error(&envelope),
            JsonContent::Result => self.handle_json_result(&envelope),
            JsonContent::Invalid => tracing::error!(sender = ?envelope.sender, "invalid json message received"),
        }
    }

    async fn handle_json_request(&mut self, envelope: Envelope) {
        let Some(raw) = envelope.payload.first() else { return };
        let payload = match relay_rpc::RequestPayload::parse(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "malformed json-rpc payload");
                return;
            }
        };
        let mut binary = BinaryContext::with_input(envelope.payload[1..].to_vec());
        let Some(response) = self.rpc.process(payload, &mut binary) else { return };

        let reply_body = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "could not serialize rpc response");
                return;
            }
        };
        let mut reply_payload = vec![Bytes::from(reply_body)];
        if let Some(output) = binary.output {
            reply_payload.extend(output);
        }

        let reply = Envelope::new(envelope.sender, Bytes::new(), MessageType::Json)
            .with_conversation_id(envelope.conversation_id)
            .with_payload(reply_payload);
        if let Err(e) = self.communicator.send_message(reply).await {
            tracing::error!(error = %e, "could not send rpc response");
        }
    }

    /// An error response to one of our own outgoing requests arrived
    /// untagged (the correlated waiter already gave up or never asked).
    fn handle_json_error(&self, envelope: &Envelope) {
        tracing::warn!(sender = ?envelope.sender, "error message received: {:?}", envelope.payload.first());
    }

    /// A result response arrived without anyone waiting on its
    /// conversation id.
    fn handle_json_result(&self, envelope: &Envelope) {
        tracing::warn!(sender = ?envelope.sender, "unsolicited result received: {:?}", envelope.payload.first());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::transport::{MemContext, Router};

    fn make_pair(name: &str) -> (MessageHandler, Router) {
        let ctx = MemContext::new();
        let addr = format!("mem:{name}");
        let router = ctx.bind(&addr);
        let dealer = ctx.dial(&addr, Bytes::from(name.as_bytes().to_vec())).unwrap();
        (MessageHandler::new(Dealer::Mem(dealer), name), Router::Mem(router))
    }

    #[tokio::test]
    async fn responds_to_pong_call() {
        let (mut handler, mut router) = make_pair("A");

        let call = relay_rpc::RpcGenerator::new().build_request("pong", ());
        let body = serde_json::to_vec(&call).unwrap();
        let envelope = Envelope::new(Bytes::from_static(b"A"), Bytes::from_static(b"caller"), MessageType::Json)
            .with_payload(vec![Bytes::from(body)]);
        let frames = envelope.encode().unwrap();

        let handle = tokio::spawn(async move {
            handler.handle_message(Envelope::decode(&frames).unwrap()).await;
            handler
        });
        let _handler = handle.await.unwrap();

        let (_id, frames) = router.recv().await.unwrap();
        let reply = Envelope::decode(&frames).unwrap();
        let body: serde_json::Value = serde_json::from_slice(&reply.payload[0]).unwrap();
        assert!(body.get("result").is_some());
    }

    #[tokio::test]
    async fn unknown_method_replies_with_method_not_found() {
        let (mut handler, mut router) = make_pair("B");
        let call = relay_rpc::RpcGenerator::new().build_request("nonexistent", ());
        let body = serde_json::to_vec(&call).unwrap();
        let envelope = Envelope::new(Bytes::from_static(b"B"), Bytes::from_static(b"caller"), MessageType::Json)
            .with_payload(vec![Bytes::from(body)]);
        let frames = envelope.encode().unwrap();

        handler.handle_message(Envelope::decode(&frames).unwrap()).await;

        let (_id, frames) = router.recv().await.unwrap();
        let reply = Envelope::decode(&frames).unwrap();
        let body: serde_json::Value = serde_json::from_slice(&reply.payload[0]).unwrap();
        assert_eq!(body["error"]["code"], serde_json::json!(-32601));
    }

    #[test]
    fn classify_json_distinguishes_request_result_error() {
        assert!(matches!(
            classify_json(&serde_json::json!({"method": "pong"})),
            JsonContent::Request
        ));
        assert!(matches!(
            classify_json(&serde_json::json!({"result": 1})),
            JsonContent::Result
        ));
        assert!(matches!(
            classify_json(&serde_json::json!({"error": {"code": -1, "message": "x"}})),
            JsonContent::Error
        ));
        assert!(matches!(classify_json(&serde_json::json!({})), JsonContent::Invalid));
    }
}
