use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::RpcErrorObject;
use crate::types::{Params, Request};

/// Builds JSON-RPC requests and interprets responses, surfacing a method's
/// error object as a typed [`RpcErrorObject`] rather than a bare JSON blob.
#[derive(Debug, Default)]
pub struct RpcGenerator {
    next_id: u64,
}

impl RpcGenerator {
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    fn fresh_id(&mut self) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        Value::from(id)
    }

    /// Build a request with positional parameters.
    pub fn build_request(&mut self, method: &str, params: impl Serialize) -> Request {
        let value = serde_json::to_value(params).expect("params serialize");
        let params = match value {
            Value::Null => None,
            Value::Array(items) => Some(Params::Positional(items)),
            Value::Object(map) => Some(Params::Named(map)),
            other => Some(Params::Positional(vec![other])),
        };
        Request::call(method, params, self.fresh_id())
    }

    /// Build a fire-and-forget notification.
    pub fn build_notification(&mut self, method: &str, params: impl Serialize) -> Request {
        let value = serde_json::to_value(params).expect("params serialize");
        let params = match value {
            Value::Null => None,
            Value::Array(items) => Some(Params::Positional(items)),
            Value::Object(map) => Some(Params::Named(map)),
            other => Some(Params::Positional(vec![other])),
        };
        Request::notification(method, params)
    }
}

/// Extract a typed result from a parsed response body, mapping a JSON-RPC
/// error object to `Err`.
pub fn extract_result<R: DeserializeOwned>(body: &Value) -> Result<R, RpcErrorObject> {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let error: RpcErrorObject = serde_json::from_value(error.clone())
            .unwrap_or_else(|_| RpcErrorObject::new(-32000, "malformed error object"));
        return Err(error);
    }
    let result = body.get("result").cloned().unwrap_or(Value::Null);
    serde_json::from_value(result)
        .map_err(|e| RpcErrorObject::new(-32000, format!("invalid server response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_assigns_increasing_ids() {
        let mut gen = RpcGenerator::new();
        let a = gen.build_request("pong", ());
        let b = gen.build_request("pong", ());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn notification_has_no_id() {
        let mut gen = RpcGenerator::new();
        let note = gen.build_notification("pong", ());
        assert!(note.is_notification());
    }

    #[test]
    fn extract_result_surfaces_error_object() {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32091, "message": "Duplicate name" }
        });
        let result: Result<(), _> = extract_result(&body);
        assert_eq!(result.unwrap_err().code, -32091);
    }

    #[test]
    fn extract_result_deserializes_success() {
        let body = serde_json::json!({ "jsonrpc": "2.0", "id": 1, "result": 42 });
        let result: Result<u32, _> = extract_result(&body);
        assert_eq!(result.unwrap(), 42);
    }
}
