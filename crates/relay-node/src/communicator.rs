use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use relay_buffer::MessageBuffer;
use relay_core::transport::Dealer;
use relay_rpc::{extract_result, ErrorCode, RpcErrorObject, RpcGenerator};
use relay_wire::{split_name, Envelope, MessageType};

use crate::error::NodeError;

/// Sign-in/out, heartbeat, and ask/reply correlated by conversation id, for
/// one component's single I/O thread. A single `BaseCommunicator` must stay
/// owned by one thread; cross-thread access goes through [`crate::pipe`],
/// which is why the buffer lives behind an `Arc` even though it is only
/// ever constructed here — the pipe handler hands clones of it out to
/// `CommunicatorPipe`s on other threads.
pub struct BaseCommunicator {
    dealer: Dealer,
    name: String,
    namespace: Option<String>,
    buffer: Arc<MessageBuffer>,
    rpc: RpcGenerator,
}

impl BaseCommunicator {
    pub fn new(dealer: Dealer, name: impl Into<String>) -> Self {
        Self { dealer, name: name.into(), namespace: None, buffer: Arc::new(MessageBuffer::new()), rpc: RpcGenerator::new() }
    }

    /// Clone of the handle to this communicator's buffer, for sharing with
    /// `CommunicatorPipe`s running on other threads.
    pub fn buffer_handle(&self) -> Arc<MessageBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Sign out, change the local name, and forget any assigned namespace —
    /// the caller is expected to sign in again under the new name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.namespace = None;
    }

    /// `namespace.name` once signed in, otherwise the bare name (matching
    /// the source handling an as-yet-unnamespaced component).
    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}.{}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    /// Fill an empty sender with our full name and emit the frames.
    pub async fn send_message(&mut self, mut envelope: Envelope) -> Result<(), NodeError> {
        if envelope.sender.is_empty() {
            envelope.sender = Bytes::from(self.full_name().into_bytes());
        }
        let frames = envelope.encode()?;
        self.dealer.send(frames).await?;
        Ok(())
    }

    /// Pop a buffered message if one is already waiting; otherwise loop on
    /// the socket until a matching message arrives or `timeout` elapses.
    pub async fn read_message(&mut self, cid: Option<[u8; 16]>, timeout: Duration) -> Result<Envelope, NodeError> {
        if let Some(buffered) = self.take_buffered(cid) {
            return Ok(buffered);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(NodeError::Timeout);
            }
            let frames = match tokio::time::timeout(deadline - now, self.dealer.recv()).await {
                Ok(Ok(frames)) => frames,
                Ok(Err(e)) => return Err(NodeError::Transport(e)),
                Err(_) => return Err(NodeError::Timeout),
            };
            let envelope = Envelope::decode(&frames)?;

            if self.is_not_signed_in(&envelope) {
                self.handle_not_signed_in().await?;
                continue;
            }

            match cid {
                Some(want) if envelope.conversation_id == want => return Ok(envelope),
                Some(_) => self.buffer.add_message(envelope),
                None => {
                    self.buffer.add_message(envelope);
                    if let Some(m) = self.buffer.retrieve_untagged() {
                        return Ok(m);
                    }
                }
            }
        }
    }

    fn take_buffered(&self, cid: Option<[u8; 16]>) -> Option<Envelope> {
        match cid {
            Some(cid) => self.buffer.retrieve_message(cid),
            None => self.buffer.retrieve_untagged(),
        }
    }

    fn is_not_signed_in(&self, envelope: &Envelope) -> bool {
        let Some(Ok(body)) = envelope.json_body() else { return false };
        body.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_i64())
            .map(|code| code == ErrorCode::NotSignedIn as i64)
            .unwrap_or(false)
    }

    /// Mark the conversation id expected, send, then read filtered to it.
    pub async fn ask_message(&mut self, envelope: Envelope, timeout: Duration) -> Result<Envelope, NodeError> {
        let cid = envelope.conversation_id;
        self.buffer.add_conversation_id(cid);
        self.send_message(envelope).await?;
        self.read_message(Some(cid), timeout).await
    }

    fn local_coordinator_receiver(&self) -> Bytes {
        let ns = self.namespace.clone().unwrap_or_default();
        if ns.is_empty() {
            Bytes::from_static(b"COORDINATOR")
        } else {
            Bytes::from(format!("{ns}.COORDINATOR").into_bytes())
        }
    }

    fn build_rpc_call(&mut self, method: &str) -> Envelope {
        let request = self.rpc.build_request(method, ());
        let body = serde_json::to_vec(&request).expect("request serializes");
        Envelope::new(self.local_coordinator_receiver(), Bytes::new(), MessageType::Json).with_payload(vec![body.into()])
    }

    pub async fn sign_in(&mut self) -> Result<(), NodeError> {
        let envelope = self.build_rpc_call("sign_in");
        let response = match self.ask_message(envelope, Duration::from_secs(5)).await {
            Ok(r) => r,
            Err(NodeError::Timeout) => {
                tracing::warn!(name = %self.name, "sign_in timed out");
                return Err(NodeError::Timeout);
            }
            Err(e) => return Err(e),
        };
        let Some(Ok(body)) = response.json_body() else {
            tracing::warn!(name = %self.name, "sign_in response was not JSON");
            return Ok(());
        };
        match extract_result::<serde_json::Value>(&body) {
            Ok(_) => {
                let full = split_name(&response.sender, "");
                self.namespace = Some(full.namespace);
                Ok(())
            }
            Err(err) if err.code == ErrorCode::DuplicateName as i64 => {
                tracing::warn!(name = %self.name, "sign_in rejected: duplicate name");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(name = %self.name, error = %err, "sign_in failed");
                Ok(())
            }
        }
    }

    pub async fn sign_out(&mut self) -> Result<(), NodeError> {
        let envelope = self.build_rpc_call("sign_out");
        match self.ask_message(envelope, Duration::from_secs(5)).await {
            Ok(_) => {
                self.namespace = None;
                Ok(())
            }
            Err(NodeError::Timeout) => {
                tracing::warn!(name = %self.name, "sign_out timed out");
                self.namespace = None;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn heartbeat(&mut self) -> Result<(), NodeError> {
        let envelope = Envelope::new(self.local_coordinator_receiver(), Bytes::new(), MessageType::NotDefined);
        self.send_message(envelope).await
    }

    async fn handle_not_signed_in(&mut self) -> Result<(), NodeError> {
        self.namespace = None;
        self.sign_in().await
    }
}
