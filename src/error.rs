use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;

/// Errors surfaced by the public pub/sub operations
#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provisioning failed for {entity}: {source}")]
    Provisioning {
        entity: String,
        #[source]
        source: MessagingError,
    },

    #[error("Publish to {topic} failed: {source}")]
    Publish {
        topic: String,
        #[source]
        source: MessagingError,
    },

    #[error("Publish to {topic} gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        topic: String,
        attempts: u32,
        #[source]
        source: MessagingError,
    },

    #[error("Bulk publish to {topic} failed for {} entries: {source}", failed_entries.len())]
    BulkPublish {
        topic: String,
        failed_entries: Vec<String>,
        #[source]
        source: MessagingError,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Component is closed")]
    Closed,

    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

impl PubSubError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

impl From<ConfigurationError> for PubSubError {
    fn from(err: ConfigurationError) -> Self {
        PubSubError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PubSubError>;
