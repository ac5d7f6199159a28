//! Broker error types.

use thiserror::Error;

use crate::message::MessageId;

/// Errors that can occur when talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker could not accept the request right now. Safe to retry.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The broker or producer has been shut down.
    #[error("Broker has been shut down")]
    Shutdown,

    /// No staged half message exists with the given id.
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(MessageId),

    /// A message body could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for broker results.
pub type Result<T> = std::result::Result<T, BrokerError>;
