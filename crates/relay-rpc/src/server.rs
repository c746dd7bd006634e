use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ErrorCode, MethodError, RpcErrorObject};
use crate::types::{Params, Request, RequestPayload, Response};

/// Binary side-payload carried alongside a single call: the frames the
/// caller attached after frame 0, and (for methods that produce one) the
/// frames the method wants attached to the response.
#[derive(Debug, Default, Clone)]
pub struct BinaryContext {
    pub input: Vec<Bytes>,
    pub output: Option<Vec<Bytes>>,
}

impl BinaryContext {
    pub fn with_input(input: Vec<Bytes>) -> Self {
        Self { input, output: None }
    }
}

/// Errors raised when registering a method, distinct from the errors a
/// registered method can raise at call time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    DuplicateMethod(String),
    InvalidMethodName(String),
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationError::DuplicateMethod(name) => write!(f, "method `{name}` already registered"),
            RegistrationError::InvalidMethodName(name) => {
                write!(f, "invalid method name `{name}`: must match [\\w.]+")
            }
        }
    }
}

impl std::error::Error for RegistrationError {}

type HandlerFn = Box<dyn Fn(Value, &mut BinaryContext) -> Result<Value, MethodError> + Send + Sync>;

struct MethodEntry {
    summary: Option<String>,
    description: Option<String>,
    accept_binary_input: bool,
    return_binary_output: bool,
    handler: HandlerFn,
}

/// A JSON-RPC 2.0 server: a named method table plus batch/notification
/// handling, following the `rpc.discover` convention.
pub struct RpcServer {
    title: String,
    version: String,
    methods: BTreeMap<String, MethodEntry>,
}

impl RpcServer {
    pub fn new(title: impl Into<String>, version: impl Into<String>) -> Self {
        Self { title: title.into(), version: version.into(), methods: BTreeMap::new() }
    }

    fn validate_name(name: &str) -> Result<(), RegistrationError> {
        if name.is_empty()
            || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            return Err(RegistrationError::InvalidMethodName(name.to_string()));
        }
        Ok(())
    }

    /// Register a plain method: deserializes `params` into `P`, invokes `f`,
    /// and serializes its `Ok` result back to JSON. A `P` deserialization
    /// failure becomes `InvalidParams`; a serialization failure of the
    /// return value becomes `InternalError`.
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
        self.register_raw(name, summary, description, false, false, move |params, _ctx| {
            let parsed: P = serde_json::from_value(params).map_err(|e| {
                MethodError::new(ErrorCode::InvalidParams as i64, format!("invalid params: {e}"))
            })?;
            let result = f(parsed)?;
            serde_json::to_value(result).map_err(|e| {
                MethodError::new(ErrorCode::InternalError as i64, format!("InternalError: {e}"))
            })
        })
    }

    /// Register a method that additionally consumes and/or produces binary
    /// side-payload frames (the frames after frame 0 of the enclosing
    /// envelope).
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
        self.register_raw(
            name,
            summary,
            description,
            accept_binary_input,
            return_binary_output,
            move |params, ctx| {
                let parsed: P = serde_json::from_value(params).map_err(|e| {
                    MethodError::new(ErrorCode::InvalidParams as i64, format!("invalid params: {e}"))
                })?;
                let result = f(parsed, ctx)?;
                serde_json::to_value(result).map_err(|e| {
                    MethodError::new(ErrorCode::InternalError as i64, format!("InternalError: {e}"))
                })
            },
        )
    }

    fn register_raw(
        &mut self,
        name: impl Into<String>,
        summary: Option<&str>,
        description: Option<&str>,
        accept_binary_input: bool,
        return_binary_output: bool,
        handler: impl Fn(Value, &mut BinaryContext) -> Result<Value, MethodError> + Send + Sync + 'static,
    ) -> Result<(), RegistrationError> {
        let name = name.into();
        Self::validate_name(&name)?;
        if self.methods.contains_key(&name) {
            return Err(RegistrationError::DuplicateMethod(name));
        }
        self.methods.insert(
            name,
            MethodEntry {
                summary: summary.map(str::to_string),
                description: description.map(str::to_string),
                accept_binary_input,
                return_binary_output,
                handler: Box::new(handler),
            },
        );
        Ok(())
    }

    /// Process a raw parsed JSON-RPC payload (single value or batch).
    /// Returns `None` when nothing should be written to the wire (an
    /// all-notification batch, or a lone notification).
    pub fn process(&self, payload: RequestPayload, binary: &mut BinaryContext) -> Option<Value> {
        match payload {
            RequestPayload::Single(value) => self.process_single(value, binary).map(|r| {
                serde_json::to_value(r).expect("Response always serializes")
            }),
            RequestPayload::Batch(items) => {
                if items.is_empty() {
                    return Some(serde_json::to_value(Response::failure(
                        Value::Null,
                        RpcErrorObject::from(ErrorCode::InvalidRequest),
                    )).unwrap());
                }
                if is_mixed_batch(&items) {
                    return Some(serde_json::to_value(Response::failure(
                        Value::Null,
                        RpcErrorObject::from(ErrorCode::InvalidRequest).with_data(Value::from("mixed batch")),
                    )).unwrap());
                }
                let mut responses = Vec::new();
                for item in items {
                    // Batch elements don't carry binary side-payload in this
                    // design (only the lone-call path does); share one
                    // context so the first binary-capable call in a batch
                    // can still consume it, matching how a single inbound
                    // envelope carries one side-payload for its whole batch.
                    if let Some(resp) = self.process_single(item, binary) {
                        responses.push(serde_json::to_value(resp).expect("Response serializes"));
                    }
                }
                if responses.is_empty() {
                    None
                } else {
                    Some(Value::Array(responses))
                }
            }
        }
    }

    fn process_single(&self, value: Value, binary: &mut BinaryContext) -> Option<Response> {
        let request: Request = match serde_json::from_value(value) {
            Ok(req) => req,
            Err(_) => {
                return Some(Response::failure(Value::Null, RpcErrorObject::from(ErrorCode::InvalidRequest)));
            }
        };
        let is_notification = request.is_notification();
        let id = request.id.clone().unwrap_or(Value::Null);

        if request.method == "rpc.discover" {
            let result = self.discover();
            return if is_notification { None } else { Some(Response::success(id, result)) };
        }

        let Some(entry) = self.methods.get(&request.method) else {
            if is_notification {
                tracing::debug!(method = %request.method, "notification for unknown method ignored");
                return None;
            }
            return Some(Response::failure(
                id,
                RpcErrorObject::from(ErrorCode::MethodNotFound).with_data(Value::from(request.method.clone())),
            ));
        };

        if entry.accept_binary_input {
            // additional payload was already installed into `binary.input`
            // by the caller before invoking `process`.
        }

        let params_value = params_to_value(request.params);
        let outcome = (entry.handler)(params_value, binary);

        match outcome {
            Ok(result) => {
                if entry.return_binary_output && binary.output.is_none() {
                    binary.output = Some(Vec::new());
                }
                if is_notification {
                    None
                } else {
                    Some(Response::success(id, result))
                }
            }
            Err(err) => {
                if is_notification {
                    tracing::warn!(method = %request.method, error = %err, "error in notification handler");
                    None
                } else {
                    Some(Response::failure(id, err.0))
                }
            }
        }
    }

    fn discover(&self) -> Value {
        let methods: Vec<Value> = self
            .methods
            .iter()
            .map(|(name, entry)| {
                let mut obj = serde_json::Map::new();
                obj.insert("name".into(), Value::from(name.clone()));
                if let Some(summary) = &entry.summary {
                    obj.insert("summary".into(), Value::from(summary.clone()));
                }
                if let Some(description) = &entry.description {
                    obj.insert("description".into(), Value::from(description.clone()));
                }
                Value::Object(obj)
            })
            .collect();

        serde_json::json!({
            "openrpc": "1.2.6",
            "info": { "title": self.title, "version": self.version },
            "methods": methods,
        })
    }
}

/// A batch is mixed when it holds both request-shaped elements (a `method`
/// field) and response-shaped elements (`result`/`error`, no `method`) —
/// rejected as a whole rather than answered item-by-item.
fn is_mixed_batch(items: &[Value]) -> bool {
    let mut has_request = false;
    let mut has_response = false;
    for item in items {
        if item.get("method").is_some() {
            has_request = true;
        } else if item.get("result").is_some() || item.get("error").is_some() {
            has_response = true;
        }
    }
    has_request && has_response
}

fn params_to_value(params: Option<Params>) -> Value {
    match params {
        None => Value::Null,
        Some(Params::Positional(items)) => Value::Array(items),
        Some(Params::Named(map)) => Value::Object(map),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Request;

    fn server_with_pong() -> RpcServer {
        let mut server = RpcServer::new("test", "1.0");
        server
            .register::<(), (), _>("pong", None, None, |_: ()| Ok(()))
            .unwrap();
        server
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut server = server_with_pong();
        let err = server
            .register::<(), (), _>("pong", None, None, |_: ()| Ok(()))
            .unwrap_err();
        assert_eq!(err, RegistrationError::DuplicateMethod("pong".into()));
    }

    #[test]
    fn invalid_method_name_rejected() {
        let mut server = RpcServer::new("test", "1.0");
        let err = server
            .register::<(), (), _>("bad name!", None, None, |_: ()| Ok(()))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidMethodName(_)));
    }

    #[test]
    fn call_returns_success_response() {
        let server = server_with_pong();
        let req = serde_json::to_value(Request::call("pong", None, Value::from(1))).unwrap();
        let mut ctx = BinaryContext::default();
        let resp = server.process(RequestPayload::Single(req), &mut ctx).unwrap();
        let resp: Response = serde_json::from_value(resp).unwrap();
        assert!(!resp.is_error());
    }

    #[test]
    fn notification_produces_no_response() {
        let server = server_with_pong();
        let req = serde_json::to_value(Request::notification("pong", None)).unwrap();
        let mut ctx = BinaryContext::default();
        assert!(server.process(RequestPayload::Single(req), &mut ctx).is_none());
    }

    #[test]
    fn unknown_method_is_method_not_found() {
        let server = server_with_pong();
        let req = serde_json::to_value(Request::call("nope", None, Value::from(1))).unwrap();
        let mut ctx = BinaryContext::default();
        let resp = server.process(RequestPayload::Single(req), &mut ctx).unwrap();
        let resp: Response = serde_json::from_value(resp).unwrap();
        assert_eq!(resp.error.unwrap().code, ErrorCode::MethodNotFound as i64);
    }

    #[test]
    fn batch_of_only_notifications_yields_no_response() {
        let server = server_with_pong();
        let batch = vec![
            serde_json::to_value(Request::notification("pong", None)).unwrap(),
            serde_json::to_value(Request::notification("pong", None)).unwrap(),
        ];
        let mut ctx = BinaryContext::default();
        assert!(server.process(RequestPayload::Batch(batch), &mut ctx).is_none());
    }

    #[test]
    fn mixed_request_and_response_batch_is_rejected_outright() {
        let server = server_with_pong();
        let batch = vec![
            serde_json::to_value(Request::call("pong", None, Value::from(1))).unwrap(),
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": null}),
        ];
        let mut ctx = BinaryContext::default();
        let resp = server.process(RequestPayload::Batch(batch), &mut ctx).unwrap();
        let resp: Response = serde_json::from_value(resp).unwrap();
        assert_eq!(resp.error.unwrap().code, ErrorCode::InvalidRequest as i64);
    }

    #[test]
    fn discover_excludes_itself() {
        let server = server_with_pong();
        let req = serde_json::to_value(Request::call("rpc.discover", None, Value::from(1))).unwrap();
        let mut ctx = BinaryContext::default();
        let resp = server.process(RequestPayload::Single(req), &mut ctx).unwrap();
        let resp: Response = serde_json::from_value(resp).unwrap();
        let result = resp.result.unwrap();
        let methods = result["methods"].as_array().unwrap();
        assert!(methods.iter().all(|m| m["name"] != "rpc.discover"));
        assert!(methods.iter().any(|m| m["name"] == "pong"));
    }

    #[test]
    fn bad_params_become_invalid_params() {
        let mut server = RpcServer::new("test", "1.0");
        server
            .register::<u32, u32, _>("double", None, None, |n: u32| Ok(n * 2))
            .unwrap();
        let req = serde_json::to_value(Request::call(
            "double",
            Some(Params::Positional(vec![Value::from("not a number")])),
            Value::from(1),
        ))
        .unwrap();
        let mut ctx = BinaryContext::default();
        let resp = server.process(RequestPayload::Single(req), &mut ctx).unwrap();
        let resp: Response = serde_json::from_value(resp).unwrap();
        assert_eq!(resp.error.unwrap().code, ErrorCode::InvalidParams as i64);
    }
}
