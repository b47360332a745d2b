//! Relay error types
//!
//! A single error enum covers the publish path (validation and transport),
//! the consume path (decode and apply) and the registry. Publish-time errors
//! reach the original caller; consume-time errors never do.

use thiserror::Error;

/// Errors that can occur while relaying mutation commands
#[derive(Error, Debug)]
pub enum RelayError {
    /// Command failed validation before it was published
    #[error("Rejected invalid command: {0}")]
    RejectedInvalid(String),

    /// Command cannot be encoded (missing id, fields on a delete, bad field)
    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    /// Payload does not parse as the envelope expected for its topic
    #[error("Malformed envelope on topic '{topic}': {reason}")]
    MalformedEnvelope { topic: String, reason: String },

    /// Broker unreachable, rejected the record, or the publisher is closed
    #[error("Transport error on topic '{topic}': {message}")]
    Transport { topic: String, message: String },

    /// Broker did not acknowledge within the caller-side bound
    #[error("Publish to topic '{topic}' timed out after {timeout_ms}ms")]
    PublishTimeout { topic: String, timeout_ms: u64 },

    /// The (topic, group) pair already has a live receive loop
    #[error("consumer for topic '{topic}' already exists")]
    AlreadyRegistered { topic: String, group: String },

    /// Topic does not name a relayed route
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// Broker-level failure while subscribing
    #[error("error registering consumer for topic '{topic}' (group '{group}'): {message}")]
    Subscribe {
        topic: String,
        group: String,
        message: String,
    },

    /// Mutation handler failed for a reason other than storage
    #[error("Handler error: {0}")]
    Handler(String),

    /// Storage call failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Registry no longer accepts registrations
    #[error("Subscription registry is shut down")]
    RegistryClosed,
}

impl RelayError {
    /// HTTP-equivalent status for surfacing the error to a request caller
    ///
    /// Validation failures are 4xx; transport and internal failures are 5xx.
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::RejectedInvalid(_)
            | RelayError::UnsupportedCommand(_)
            | RelayError::MalformedEnvelope { .. }
            | RelayError::UnknownTopic(_) => 400,
            RelayError::AlreadyRegistered { .. } => 409,
            RelayError::Transport { .. } | RelayError::RegistryClosed => 503,
            RelayError::PublishTimeout { .. } => 504,
            RelayError::Subscribe { .. }
            | RelayError::Handler(_)
            | RelayError::Storage(_)
            | RelayError::InvalidConfig(_) => 500,
        }
    }

    /// Whether repeating the same operation may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RelayError::Transport { .. }
                | RelayError::PublishTimeout { .. }
                | RelayError::Storage(_)
                | RelayError::Handler(_)
        )
    }

    pub(crate) fn transport(topic: &str, message: impl ToString) -> Self {
        RelayError::Transport {
            topic: topic.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn malformed(topic: &str, reason: impl ToString) -> Self {
        RelayError::MalformedEnvelope {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<tokio_postgres::Error> for RelayError {
    fn from(err: tokio_postgres::Error) -> Self {
        RelayError::Storage(format!("Database error: {}", err))
    }
}
