pub mod communicator;
pub mod coordinator;
pub mod error;
pub mod log_relay;
pub mod message_handler;
pub mod pipe;

pub use communicator::BaseCommunicator;
pub use coordinator::{Coordinator, DEFAULT_COORDINATOR_PORT};
pub use error::NodeError;
pub use log_relay::LogRelayLayer;
pub use message_handler::MessageHandler;
pub use pipe::{CommunicatorPipe, PipeHandler};
