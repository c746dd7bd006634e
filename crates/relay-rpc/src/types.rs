use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcErrorObject;

/// A request id: number, string, or absent (absent on the wire marks a
/// notification, which is modeled by `Request::id` being `None`).
pub type Id = Value;

/// The `params` field of a request: positional array, named object, or
/// omitted entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Positional(Vec<Value>),
    Named(serde_json::Map<String, Value>),
}

/// A JSON-RPC request or notification (the two differ only by whether `id`
/// is present).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
}

impl Request {
    pub fn call(method: impl Into<String>, params: Option<Params>, id: Id) -> Self {
        Self { jsonrpc: "2.0".into(), method: method.into(), params, id: Some(id) }
    }

    pub fn notification(method: impl Into<String>, params: Option<Params>) -> Self {
        Self { jsonrpc: "2.0".into(), method: method.into(), params, id: None }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC response: exactly one of `result`/`error` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    pub id: Id,
}

impl Response {
    pub fn success(id: Id, result: Value) -> Self {
        Self { jsonrpc: "2.0".into(), result: Some(result), error: None, id }
    }

    pub fn failure(id: Id, error: RpcErrorObject) -> Self {
        Self { jsonrpc: "2.0".into(), result: None, error: Some(error), id }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Either a single value or a batch array, as accepted by the server's
/// request entry point.
#[derive(Debug, Clone)]
pub enum RequestPayload {
    Single(Value),
    Batch(Vec<Value>),
}

impl RequestPayload {
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(raw)?;
        Ok(match value {
            Value::Array(items) => RequestPayload::Batch(items),
            other => RequestPayload::Single(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_id_is_a_notification() {
        let req = Request::notification("pong", None);
        assert!(req.is_notification());
    }

    #[test]
    fn request_with_id_is_not_a_notification() {
        let req = Request::call("pong", None, Value::from(1));
        assert!(!req.is_notification());
    }

    #[test]
    fn response_success_serializes_without_error_field() {
        let resp = Response::success(Value::from(1), Value::Null);
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("error").is_none());
        assert!(json.get("result").is_some());
    }

    #[test]
    fn batch_payload_parses_as_array() {
        let payload = RequestPayload::parse(br#"[{"a":1},{"b":2}]"#).unwrap();
        assert!(matches!(payload, RequestPayload::Batch(items) if items.len() == 2));
    }
}
