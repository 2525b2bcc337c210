use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod multiplexer;

pub use multiplexer::{ConnectionMultiplexer, SubscriptionId};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport dial failed: {0}")]
    Dial(String),
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("connection is shutting down")]
    ShuttingDown,
}

/// Connection lifecycle of the single shared transport. Exactly one instance,
/// mutated only by the multiplexer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}
