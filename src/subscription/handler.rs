//! Application handler traits invoked by the receive loop.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::options::ReceiveMode;
use crate::messaging::{BulkMessage, TopicMessage};

/// Handler failure; the message (or batch) is abandoned for redelivery
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Handles one message at a time
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: TopicMessage) -> Result<(), HandlerError>;
}

/// Entry of a bulk delivery the handler could not process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkEntryFailure {
    pub entry_id: String,
    pub error: String,
}

/// Per-entry outcome of a bulk handler; entries not listed succeeded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkHandlerResponse {
    pub failed_entries: Vec<BulkEntryFailure>,
}

impl BulkHandlerResponse {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self, entry_id: impl Into<String>, error: impl Into<String>) -> Self {
        self.failed_entries.push(BulkEntryFailure {
            entry_id: entry_id.into(),
            error: error.into(),
        });
        self
    }

    pub(crate) fn failed_ids(&self) -> HashSet<&str> {
        self.failed_entries
            .iter()
            .map(|f| f.entry_id.as_str())
            .collect()
    }
}

/// Handles a batch of messages
#[async_trait]
pub trait BulkMessageHandler: Send + Sync + 'static {
    /// `Err` fails the whole batch; per-entry failures go in the response
    async fn handle(&self, message: BulkMessage) -> Result<BulkHandlerResponse, HandlerError>;
}

/// Handler bound to a subscription
#[derive(Clone)]
pub enum SubscriptionHandler {
    Single(Arc<dyn MessageHandler>),
    Bulk(Arc<dyn BulkMessageHandler>),
}

impl SubscriptionHandler {
    pub fn mode(&self) -> ReceiveMode {
        match self {
            SubscriptionHandler::Single(_) => ReceiveMode::Single,
            SubscriptionHandler::Bulk(_) => ReceiveMode::Bulk,
        }
    }
}

impl std::fmt::Debug for SubscriptionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SubscriptionHandler").field(&self.mode()).finish()
    }
}
