//! JSON-RPC 2.0 request/response/batch objects, server-side method
//! dispatch, and a client-side helper for building requests and
//! interpreting typed errors.

mod client;
mod error;
mod server;
mod types;

pub use client::{extract_result, RpcGenerator};
pub use error::{ErrorCode, MethodError, RpcErrorObject};
pub use server::{BinaryContext, RegistrationError, RpcServer};
pub use types::{Id, Params, Request, RequestPayload, Response};
