use std::time::Duration;

use thiserror::Error;

/// Reasons an envelope is rejected before it enters the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("required field '{0}' is empty")]
    EmptyField(&'static str),

    #[error("unknown message type: '{0}'")]
    UnknownType(String),

    #[error("unknown priority: '{0}'")]
    UnknownPriority(String),

    #[error("envelope must be a JSON object")]
    NotAnObject,
}

/// Failure reported by a bot handler while processing a delivered envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DeliveryError(pub String);

impl DeliveryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for DeliveryError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for DeliveryError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Error taxonomy of the protocol bus.
///
/// Only `InvalidMessage` is returned to callers. The other variants are
/// recovered inside the bus and surfaced, if at all, as `ERROR` envelopes
/// or log records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] ValidationError),

    #[error("delivery to '{recipient}' failed: {source}")]
    Delivery {
        recipient: String,
        #[source]
        source: DeliveryError,
    },

    #[error("invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("recipient '{0}' is unavailable")]
    RecipientUnavailable(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] RepositoryError),

    #[error("internal error in {task}: {message}")]
    Internal { task: String, message: String },

    #[error("request {correlation_id} timed out after {timeout:?}")]
    RequestTimeout {
        correlation_id: String,
        timeout: Duration,
    },
}

/// Errors from history store operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
