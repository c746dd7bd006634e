use std::fmt;

use serde::{Deserialize, Serialize};

/// A JSON-RPC 2.0 error object, plus the LECO-specific extended codes used
/// by the routing core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for RpcErrorObject {}

/// Standard and LECO-specific JSON-RPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
    ServerError = -32000,
    NotSignedIn = -32090,
    DuplicateName = -32091,
    NodeUnknown = -32092,
    ReceiverUnknown = -32093,
}

impl ErrorCode {
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::ServerError => "Server error",
            ErrorCode::NotSignedIn => "Not signed in",
            ErrorCode::DuplicateName => "Duplicate name",
            ErrorCode::NodeUnknown => "Node unknown",
            ErrorCode::ReceiverUnknown => "Receiver unknown",
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            -32000 => ErrorCode::ServerError,
            -32090 => ErrorCode::NotSignedIn,
            -32091 => ErrorCode::DuplicateName,
            -32092 => ErrorCode::NodeUnknown,
            -32093 => ErrorCode::ReceiverUnknown,
            _ => return None,
        })
    }
}

impl From<ErrorCode> for RpcErrorObject {
    fn from(code: ErrorCode) -> Self {
        RpcErrorObject::new(code as i64, code.message())
    }
}

/// Errors a registered method implementation can raise; distinguished from
/// bookkeeping errors the server itself produces (parse/method-not-found/
/// invalid-params), which are built directly as [`RpcErrorObject`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodError(pub RpcErrorObject);

impl MethodError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self(RpcErrorObject::new(code, message))
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for MethodError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_lookup() {
        for code in [
            ErrorCode::ParseError,
            ErrorCode::NotSignedIn,
            ErrorCode::DuplicateName,
            ErrorCode::NodeUnknown,
            ErrorCode::ReceiverUnknown,
        ] {
            assert_eq!(ErrorCode::from_code(code as i64), Some(code));
        }
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(ErrorCode::from_code(-1), None);
    }
}
