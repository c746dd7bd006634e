use std::fmt::Write as _;

use bytes::Bytes;
use relay_wire::{generate_conversation_id, Envelope, MessageType};
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::pipe::CommunicatorPipe;

/// Maps a `tracing::Level` onto LECO's five log level names
/// (`pyleco/core/leco_protocols.py::LogLevels`). `tracing` has no
/// `CRITICAL` level, so `ERROR` is the ceiling, matching
/// `log_levels.py::PythonLogLevels`, which has no level above Python's
/// own `CRITICAL` either and is only ever consulted going the other way
/// (component-requested level name -> numeric threshold).
fn level_name(level: &tracing::Level) -> &'static str {
    match *level {
        tracing::Level::TRACE => "DEBUG",
        tracing::Level::DEBUG => "DEBUG",
        tracing::Level::INFO => "INFO",
        tracing::Level::WARN => "WARNING",
        tracing::Level::ERROR => "ERROR",
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

/// Republishes this component's `tracing` events to its Coordinator as
/// JSON-RPC notifications, grounded on `pyleco/utils/zmq_log_handler.py`'s
/// `ZmqLogHandler`: where that class hooks into Python's `logging` module
/// as a `QueueHandler`, this hooks into `tracing` as a `Layer`, reusing the
/// same control-plane envelope machinery instead of opening a separate
/// log-ingress socket (no log-plane socket exists here; see SPEC_FULL.md
/// §4.8/§6).
pub struct LogRelayLayer {
    pipe: CommunicatorPipe,
}

impl LogRelayLayer {
    /// `pipe` should be a dedicated `CommunicatorPipe` (from
    /// `PipeHandler::communicator`), not one also used for RPC calls, so a
    /// burst of log events can't starve unrelated `ask_message` traffic on
    /// the same handler.
    pub fn new(pipe: CommunicatorPipe) -> Self {
        Self { pipe }
    }
}

impl<S> Layer<S> for LogRelayLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut message = visitor.message;
        if !visitor.fields.is_empty() {
            message.push_str(&visitor.fields);
        }

        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "log",
            "params": {
                "level": level_name(metadata.level()),
                "logger": metadata.target(),
                "message": message,
            },
        });
        let Ok(body) = serde_json::to_vec(&notification) else {
            return;
        };

        let envelope = Envelope::new(Bytes::from_static(b"COORDINATOR"), Bytes::new(), MessageType::Json)
            .with_conversation_id(generate_conversation_id())
            .with_payload(vec![Bytes::from(body)]);

        // Best-effort: a dropped log line is preferable to blocking the
        // thread that's emitting it.
        let _ = self.pipe.send_message(envelope);
    }
}
