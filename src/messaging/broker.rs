//! # Broker Collaborator Traits
//!
//! Capability contracts the engine consumes. A concrete broker SDK (or the
//! [`InMemoryBroker`](crate::messaging::InMemoryBroker)) implements them; the
//! engine never talks to a broker any other way.
//!
//! All methods are plain futures. Cancellation and per-call timeouts are applied
//! by the caller (`tokio::select!` against a `CancellationToken`,
//! `tokio::time::timeout`), so implementations must be cancel-safe: dropping an
//! in-flight future must not leave the broker in an inconsistent state.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::errors::MessagingError;
use super::message::{BrokerMessage, MessageBatch, ReceivedMessage};

/// Options used when provisioning a subscription entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEntityOptions {
    pub require_sessions: bool,
    pub max_concurrent_sessions: usize,
}

/// Entry point into the broker
#[async_trait]
pub trait BrokerClient: Send + Sync + Debug + 'static {
    /// Create the topic if missing; no-op when entity management is disabled
    async fn ensure_topic(&self, topic: &str) -> Result<(), MessagingError>;

    /// Create the subscription if missing; no-op when entity management is disabled
    async fn ensure_subscription(
        &self,
        consumer_id: &str,
        topic: &str,
        options: &SubscriptionEntityOptions,
    ) -> Result<(), MessagingError>;

    /// Open a new sender for a topic.
    ///
    /// Callers go through [`SenderRegistry`](crate::messaging::SenderRegistry),
    /// which caches senders and guarantees at most one live sender per topic.
    async fn create_sender(&self, topic: &str) -> Result<Arc<dyn Sender>, MessagingError>;

    /// Open a non-session receiver on `consumer_id`'s subscription to `topic`
    async fn new_receiver(
        &self,
        topic: &str,
        consumer_id: &str,
    ) -> Result<Arc<dyn Receiver>, MessagingError>;

    /// Wait for the next session with available messages and lock it.
    ///
    /// The returned receiver reports the session through
    /// [`Receiver::session_id`]. This call may block for a long time; callers
    /// race it against cancellation.
    async fn accept_next_session(
        &self,
        topic: &str,
        consumer_id: &str,
    ) -> Result<Arc<dyn Receiver>, MessagingError>;
}

/// Publishing handle for one topic
#[async_trait]
pub trait Sender: Send + Sync + Debug {
    async fn send_message(&self, message: BrokerMessage) -> Result<(), MessagingError>;

    /// Create an empty batch bounded to `max_bytes`
    fn new_batch(&self, max_bytes: u64) -> MessageBatch {
        MessageBatch::new(max_bytes)
    }

    /// Send a whole batch in one call; the broker accepts or rejects it as a unit
    async fn send_batch(&self, batch: MessageBatch) -> Result<(), MessagingError>;

    async fn close(&self) -> Result<(), MessagingError>;
}

/// Open receive channel, optionally scoped to a session
#[async_trait]
pub trait Receiver: Send + Sync + Debug {
    /// Wait for at least one message and return up to `max_messages`
    async fn receive_messages(
        &self,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, MessagingError>;

    async fn complete_message(&self, message: &ReceivedMessage) -> Result<(), MessagingError>;

    async fn abandon_message(&self, message: &ReceivedMessage) -> Result<(), MessagingError>;

    async fn renew_message_lock(&self, message: &ReceivedMessage) -> Result<(), MessagingError>;

    /// Renew the session lock; session receivers only
    async fn renew_session_lock(&self) -> Result<(), MessagingError>;

    /// Session this receiver is locked to, if any
    fn session_id(&self) -> Option<&str>;

    /// Close the receiver. Must be idempotent.
    async fn close(&self) -> Result<(), MessagingError>;
}
