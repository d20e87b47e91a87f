//! # Messaging Error Types
//!
//! Errors raised by the broker collaborator (client, senders, receivers) using
//! thiserror for structured error types instead of `Box<dyn Error>` patterns.
//!
//! Whether an error is retried is decided by an
//! [`ErrorClassifier`](crate::messaging::ErrorClassifier), not by the error itself.

use thiserror::Error;

/// Errors reported by broker operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Network timeout: operation {operation} timed out after {timeout_seconds}s")]
    Timeout {
        operation: String,
        timeout_seconds: u64,
    },

    #[error("Broker throttled the request: {message}")]
    Throttled { message: String },

    #[error("Broker is busy: {message}")]
    ServerBusy { message: String },

    #[error("Entity not found: {entity}")]
    EntityNotFound { entity: String },

    #[error("Authorization failed for entity: {entity}: {message}")]
    Authorization { entity: String, message: String },

    #[error("Message too large: {size_bytes} bytes exceeds limit of {limit_bytes} bytes")]
    MessageTooLarge {
        size_bytes: usize,
        limit_bytes: usize,
    },

    #[error("Message lock lost: {lock_token}")]
    LockLost { lock_token: String },

    #[error("Session lock lost: {session_id}")]
    SessionLockLost { session_id: String },

    #[error("Receiver is closed")]
    ReceiverClosed,

    #[error("Sender is closed: {topic}")]
    SenderClosed { topic: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    /// Create a throttling error
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::Throttled {
            message: message.into(),
        }
    }

    /// Create a server busy error
    pub fn server_busy(message: impl Into<String>) -> Self {
        Self::ServerBusy {
            message: message.into(),
        }
    }

    /// Create an entity not found error
    pub fn entity_not_found(entity: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity: entity.into(),
        }
    }

    /// Create an authorization error
    pub fn authorization(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authorization {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create a lock lost error
    pub fn lock_lost(lock_token: impl Into<String>) -> Self {
        Self::LockLost {
            lock_token: lock_token.into(),
        }
    }

    /// Create a session lock lost error
    pub fn session_lock_lost(session_id: impl Into<String>) -> Self {
        Self::SessionLockLost {
            session_id: session_id.into(),
        }
    }

    /// Create a sender closed error
    pub fn sender_closed(topic: impl Into<String>) -> Self {
        Self::SenderClosed {
            topic: topic.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error means the receiver can no longer be used at all.
    ///
    /// The lock renewal loop stops on these; any other renewal error only
    /// affects the single message it was issued for.
    pub fn is_receiver_fatal(&self) -> bool {
        matches!(
            self,
            MessagingError::ReceiverClosed | MessagingError::SessionLockLost { .. }
        )
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
