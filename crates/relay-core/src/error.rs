use std::fmt;

use relay_rpc::RpcErrorObject;

/// Errors raised by directory bookkeeping operations. These never go on the
/// wire directly; callers translate the ones that should into a
/// [`RpcErrorObject`] (most already carry the right LECO error code via
/// `AsRef`).
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryError {
    DuplicateName { name: String },
    UnknownAddressOwnHost,
    NamespaceAlreadyConnected { namespace: String },
    AddressAlreadyWaiting { address: String },
    IdentityMismatch,
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::DuplicateName { name } => write!(f, "duplicate name: {name}"),
            DirectoryError::UnknownAddressOwnHost => write!(f, "cannot connect to own address"),
            DirectoryError::NamespaceAlreadyConnected { namespace } => {
                write!(f, "namespace already connected: {namespace}")
            }
            DirectoryError::AddressAlreadyWaiting { address } => {
                write!(f, "address already awaiting sign-in: {address}")
            }
            DirectoryError::IdentityMismatch => write!(f, "identity does not match recorded sender"),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// Raised by `update_heartbeat` when the frame's sender cannot be
/// reconciled against recorded state; carries the exact JSON-RPC error
/// payload the coordinator should echo back to the sender.
#[derive(Debug, Clone, PartialEq)]
pub struct CommunicationError(pub RpcErrorObject);

impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for CommunicationError {}
