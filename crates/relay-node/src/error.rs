use std::fmt;

use relay_core::transport::TransportError;
use relay_rpc::RpcErrorObject;
use relay_wire::WireError;

/// Errors surfaced to callers of the communicator/handler/coordinator
/// layer. Mirrors the three families from the error-handling design:
/// transport/timeout, protocol, and RPC.
#[derive(Debug)]
pub enum NodeError {
    Timeout,
    Transport(TransportError),
    Wire(WireError),
    Rpc(RpcErrorObject),
    ConnectionRefused { address: String },
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Timeout => write!(f, "timed out"),
            NodeError::Transport(e) => write!(f, "transport error: {e}"),
            NodeError::Wire(e) => write!(f, "wire error: {e}"),
            NodeError::Rpc(e) => write!(f, "rpc error: {e}"),
            NodeError::ConnectionRefused { address } => write!(f, "connection refused: {address}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<TransportError> for NodeError {
    fn from(e: TransportError) -> Self {
        NodeError::Transport(e)
    }
}

impl From<WireError> for NodeError {
    fn from(e: WireError) -> Self {
        NodeError::Wire(e)
    }
}

impl From<RpcErrorObject> for NodeError {
    fn from(e: RpcErrorObject) -> Self {
        NodeError::Rpc(e)
    }
}
