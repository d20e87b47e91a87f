//! # Broker Error Classification
//!
//! Decides how a broker failure is handled by the publish and subscribe paths:
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────────────┐
//! │ MessagingError  │────▶│ ErrorClassifier │────▶│ Network                  │ retry + drop cached sender
//! │                 │     │                 │     │ RetriableProtocol        │ retry, keep sender
//! └─────────────────┘     └─────────────────┘     │ Permanent                │ surface immediately
//!                                                 └──────────────────────────┘
//! ```
//!
//! Classification is broker specific, so it is injected into
//! [`TopicPubSub`](crate::TopicPubSub) rather than hard-wired.

use serde::{Deserialize, Serialize};

use super::errors::MessagingError;

/// How a failure should be treated by retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Transport-level failure: the cached connection is unusable
    Network,
    /// Broker signalled a transient condition; the connection itself is fine
    RetriableProtocol,
    /// Never retried
    Permanent,
}

impl ErrorClass {
    /// Whether retry logic may attempt the operation again
    pub fn is_retriable(self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Network => write!(f, "network"),
            ErrorClass::RetriableProtocol => write!(f, "retriable_protocol"),
            ErrorClass::Permanent => write!(f, "permanent"),
        }
    }
}

/// Broker-specific failure classification policy
pub trait ErrorClassifier: Send + Sync + 'static {
    /// Connection or transport level failure
    fn is_network_error(&self, error: &MessagingError) -> bool;

    /// Transient broker-side condition (throttling, overload)
    fn is_retriable_protocol_error(&self, error: &MessagingError) -> bool;

    /// Classify an error; network takes precedence over protocol
    fn classify(&self, error: &MessagingError) -> ErrorClass {
        if self.is_network_error(error) {
            ErrorClass::Network
        } else if self.is_retriable_protocol_error(error) {
            ErrorClass::RetriableProtocol
        } else {
            ErrorClass::Permanent
        }
    }
}

/// Default classifier for [`MessagingError`]
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardErrorClassifier;

impl StandardErrorClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn is_network_error(&self, error: &MessagingError) -> bool {
        matches!(
            error,
            MessagingError::Connection { .. }
                | MessagingError::Timeout { .. }
                | MessagingError::SenderClosed { .. }
        )
    }

    fn is_retriable_protocol_error(&self, error: &MessagingError) -> bool {
        matches!(
            error,
            MessagingError::Throttled { .. } | MessagingError::ServerBusy { .. }
        )
    }
}
