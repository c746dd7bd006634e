use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relay_buffer::MessageBuffer;
use relay_core::transport::Dealer;
use relay_rpc::RpcGenerator;
use relay_wire::{generate_conversation_id, Envelope, MessageType};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::NodeError;
use crate::message_handler::MessageHandler;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// One tagged command sent from a `CommunicatorPipe` to the owning
/// `PipeHandler`'s I/O thread.
enum PipeCommand {
    Send(Envelope),
    Subscribe(Vec<u8>),
    Unsubscribe(Vec<u8>),
    UnsubscribeAll,
    Rename(String),
    Local { conversation_id: [u8; 16], request: Vec<u8> },
}

/// A message handler shareable across worker threads. Owns the single I/O
/// thread's `MessageHandler`; every other thread talks to it through a
/// `CommunicatorPipe` obtained from [`PipeHandler::communicator`], which
/// only ever produces commands into an mpsc channel and blocks on the
/// shared `MessageBuffer`'s condition variable — it never touches the
/// dealer socket directly.
pub struct PipeHandler {
    handler: MessageHandler,
    commands: mpsc::UnboundedReceiver<PipeCommand>,
    command_sender: mpsc::UnboundedSender<PipeCommand>,
    buffer: Arc<MessageBuffer>,
    subscriptions: HashSet<Vec<u8>>,
    on_name_change: Vec<Box<dyn Fn(&str) + Send + Sync>>,
}

impl PipeHandler {
    pub fn new(dealer: Dealer, name: impl Into<String>) -> Self {
        let handler = MessageHandler::new(dealer, name);
        let buffer = handler.buffer_handle();
        let (command_sender, commands) = mpsc::unbounded_channel();
        Self { handler, commands, command_sender, buffer, subscriptions: HashSet::new(), on_name_change: Vec::new() }
    }

    pub fn full_name(&self) -> String {
        self.handler.full_name()
    }

    /// Register a plain JSON-RPC method, forwarded to the inner handler.
    pub fn register<P, R, F>(
        &mut self,
        name: impl Into<String>,
        summary: Option<&str>,
        description: Option<&str>,
        f: F,
    ) -> Result<(), relay_rpc::RegistrationError>
    where
        P: serde::de::DeserializeOwned,
        R: Serialize,
        F: Fn(P) -> Result<R, relay_rpc::MethodError> + Send + Sync + 'static,
    {
        self.handler.register(name, summary, description, f)
    }

    /// A thread-safe handle other threads use to talk to this handler. Safe
    /// to call repeatedly and from any thread; each call produces an
    /// independent handle sharing the same command channel and buffer.
    pub fn communicator(&self) -> CommunicatorPipe {
        CommunicatorPipe {
            sender: self.command_sender.clone(),
            buffer: Arc::clone(&self.buffer),
            rpc: RpcGenerator::new(),
            timeout: Duration::from_secs(1),
        }
    }

    /// Called with the new full name whenever a `REN` command completes a
    /// rename, e.g. to update a dependent pipe handler's own sender field.
    pub fn on_name_change(&mut self, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.on_name_change.push(Box::new(hook));
    }

    /// Sign in, then poll the dealer and drain pending pipe commands each
    /// tick until `stop` is set. Signs out on the way out.
    pub async fn listen(&mut self, stop: Arc<AtomicBool>, waiting_time: Duration) -> Result<(), NodeError> {
        tracing::info!(name = %self.handler.full_name(), "pipe handler starting to listen");
        self.handler.communicator_mut().sign_in().await?;

        let shutdown_requested = self.handler.shutdown_requested();
        let mut next_beat = tokio::time::Instant::now() + HEARTBEAT_INTERVAL;
        while !stop.load(Ordering::Relaxed) && !shutdown_requested.load(Ordering::Relaxed) {
            match self.handler.communicator_mut().read_message(None, waiting_time).await {
                Ok(envelope) => {
                    if !envelope.payload.is_empty() {
                        self.handler.handle_message(envelope).await;
                    }
                }
                Err(NodeError::Timeout) => {
                    if tokio::time::Instant::now() > next_beat {
                        self.handler.communicator_mut().heartbeat().await?;
                        next_beat = tokio::time::Instant::now() + HEARTBEAT_INTERVAL;
                    }
                }
                Err(e) => return Err(e),
            }
            self.drain_commands().await;
        }

        tracing::info!(name = %self.handler.full_name(), "pipe handler stopping");
        self.handler.communicator_mut().sign_out().await
    }

    async fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            self.handle_command(cmd).await;
        }
    }

    async fn handle_command(&mut self, cmd: PipeCommand) {
        match cmd {
            PipeCommand::Send(envelope) => {
                if let Err(e) = self.handler.communicator_mut().send_message(envelope).await {
                    tracing::error!(error = %e, "pipe: failed forwarding SND command");
                }
            }
            PipeCommand::Subscribe(topic) => {
                self.subscriptions.insert(topic);
            }
            PipeCommand::Unsubscribe(topic) => {
                self.subscriptions.remove(&topic);
            }
            PipeCommand::UnsubscribeAll => self.subscriptions.clear(),
            PipeCommand::Rename(name) => self.rename(name).await,
            PipeCommand::Local { conversation_id, request } => self.handle_local_request(conversation_id, &request),
        }
    }

    async fn rename(&mut self, name: String) {
        if let Err(e) = self.handler.communicator_mut().sign_out().await {
            tracing::warn!(error = %e, "pipe: sign_out during rename failed");
        }
        self.handler.communicator_mut().set_name(name);
        if let Err(e) = self.handler.communicator_mut().sign_in().await {
            tracing::warn!(error = %e, "pipe: sign_in during rename failed");
            return;
        }
        let full_name = self.handler.full_name();
        for hook in &self.on_name_change {
            hook(&full_name);
        }
    }

    fn handle_local_request(&mut self, conversation_id: [u8; 16], request: &[u8]) {
        let Some(body) = self.handler.process_local(request) else { return };
        let envelope = Envelope::new(Bytes::from_static(b"comm"), Bytes::from_static(b"ego"), MessageType::Json)
            .with_conversation_id(conversation_id)
            .with_payload(vec![body.into()]);
        self.buffer.add_message(envelope);
    }
}

/// A pipe endpoint satisfying the communicator surface from any thread.
/// Create one per caller thread via [`PipeHandler::communicator`]; cloning
/// the underlying channel/buffer handles is cheap, so there is no harm in
/// building a fresh one per thread rather than caching it.
pub struct CommunicatorPipe {
    sender: mpsc::UnboundedSender<PipeCommand>,
    buffer: Arc<MessageBuffer>,
    rpc: RpcGenerator,
    timeout: Duration,
}

impl CommunicatorPipe {
    fn send_command(&self, cmd: PipeCommand) -> Result<(), NodeError> {
        self.sender.send(cmd).map_err(|_| NodeError::ConnectionRefused { address: "pipe handler".to_string() })
    }

    /// Fire a `SND` command: the I/O thread forwards `envelope` as-is.
    pub fn send_message(&self, envelope: Envelope) -> Result<(), NodeError> {
        self.send_command(PipeCommand::Send(envelope))
    }

    /// Block until a message bearing `cid` lands in the shared buffer.
    pub fn read_message(&self, cid: [u8; 16], timeout: Option<Duration>) -> Result<Envelope, NodeError> {
        self.buffer.wait_for_message(cid, timeout.unwrap_or(self.timeout)).map_err(|_| NodeError::Timeout)
    }

    /// Reserve `envelope`'s conversation id, send it, then block for the
    /// matching reply.
    pub fn ask_message(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<Envelope, NodeError> {
        let cid = envelope.conversation_id;
        self.buffer.add_conversation_id(cid);
        self.send_message(envelope)?;
        self.read_message(cid, timeout)
    }

    pub fn subscribe_single(&self, topic: impl Into<Vec<u8>>) -> Result<(), NodeError> {
        self.send_command(PipeCommand::Subscribe(topic.into()))
    }

    pub fn unsubscribe_single(&self, topic: impl Into<Vec<u8>>) -> Result<(), NodeError> {
        self.send_command(PipeCommand::Unsubscribe(topic.into()))
    }

    pub fn unsubscribe_all(&self) -> Result<(), NodeError> {
        self.send_command(PipeCommand::UnsubscribeAll)
    }

    /// Sign out, rename, sign back in — run on the I/O thread via `REN`.
    pub fn rename(&self, name: impl Into<String>) -> Result<(), NodeError> {
        self.send_command(PipeCommand::Rename(name.into()))
    }

    /// Run `method` against the I/O thread's own method table without
    /// touching the wire, blocking for the result. Mirrors the `LOC`
    /// command, used by callers that want to invoke their own component's
    /// RPC methods from a different thread than the one that registered
    /// them.
    pub fn ask_handler<R: serde::de::DeserializeOwned>(
        &mut self,
        method: &str,
        params: impl Serialize,
        timeout: Option<Duration>,
    ) -> Result<R, NodeError> {
        let request = self.rpc.build_request(method, params);
        let raw = serde_json::to_vec(&request).expect("request serializes");
        let cid = generate_conversation_id();
        self.buffer.add_conversation_id(cid);
        self.send_command(PipeCommand::Local { conversation_id: cid, request: raw })?;
        let response = self.read_message(cid, timeout)?;
        let Some(Ok(body)) = response.json_body() else {
            return Err(NodeError::Rpc(relay_rpc::RpcErrorObject::new(
                relay_rpc::ErrorCode::InternalError as i64,
                "local response was not JSON",
            )));
        };
        relay_rpc::extract_result(&body).map_err(NodeError::Rpc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::transport::{MemContext, Router};

    fn make_pair(name: &str) -> (PipeHandler, Router) {
        let ctx = MemContext::new();
        let addr = format!("mem:{name}");
        let router = ctx.bind(&addr);
        let dealer = ctx.dial(&addr, Bytes::from(name.as_bytes().to_vec())).unwrap();
        (PipeHandler::new(Dealer::Mem(dealer), name), Router::Mem(router))
    }

    #[tokio::test]
    async fn send_command_forwards_envelope_through_the_dealer() {
        let (mut handler, mut router) = make_pair("A");
        let comm = handler.communicator();

        let envelope = Envelope::new(Bytes::from_static(b"COORDINATOR"), Bytes::new(), MessageType::NotDefined);
        comm.send_message(envelope).unwrap();
        handler.drain_commands().await;

        let (_id, frames) = router.recv().await.unwrap();
        let decoded = Envelope::decode(&frames).unwrap();
        assert_eq!(decoded.sender, Bytes::from_static(b"A"));
    }

    #[tokio::test]
    async fn local_ask_runs_registered_method_and_returns_through_buffer() {
        let (mut handler, _router) = make_pair("B");
        handler
            .register::<(), i64, _>("answer", None, None, |_: ()| Ok(42))
            .unwrap();
        let comm = handler.communicator();

        let cid = generate_conversation_id();
        comm.buffer.add_conversation_id(cid);
        let request = relay_rpc::RpcGenerator::new().build_request("answer", ());
        let raw = serde_json::to_vec(&request).unwrap();
        comm.send_command(PipeCommand::Local { conversation_id: cid, request: raw }).unwrap();
        handler.drain_commands().await;

        let response = comm.read_message(cid, Some(Duration::from_secs(1))).unwrap();
        let body = response.json_body().unwrap().unwrap();
        let result: i64 = relay_rpc::extract_result(&body).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn subscriptions_are_tracked_locally() {
        let (mut handler, _router) = make_pair("C");
        let comm = handler.communicator();
        comm.subscribe_single(b"topic".to_vec()).unwrap();
        // drain synchronously via a throwaway runtime, mirroring the I/O
        // thread's own drain call.
        tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(handler.drain_commands());
        assert!(handler.subscriptions.contains(b"topic".as_slice()));
        comm.unsubscribe_all().unwrap();
        tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(handler.drain_commands());
        assert!(handler.subscriptions.is_empty());
    }
}
