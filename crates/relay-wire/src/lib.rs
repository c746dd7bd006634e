//! Wire-level primitives for the control-plane envelope: frame layout,
//! header encoding, conversation-id generation and full-name splitting.
//!
//! This crate has no notion of sockets, routing, or JSON-RPC; it only knows
//! how to turn a [`Envelope`] into frames and back.

mod conversation;
mod envelope;
mod error;
mod name;

pub use conversation::{conversation_id_timestamp_ms, generate_conversation_id};
pub use envelope::{Envelope, MessageType, HEADER_LEN};
pub use error::WireError;
pub use name::{split_name, FullName};
