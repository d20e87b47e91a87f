//! # Subscription Module
//!
//! Long-lived subscriptions that survive transient broker failures.
//!
//! ## Architecture
//!
//! - **Supervisor**: connect, receive, tear down, back off, reconnect; one per
//!   subscription (non-session) or one dispatcher plus a worker per held slot
//!   (session mode)
//! - **Session pool**: bounds concurrently held sessions; each slot owns its
//!   own reconnect backoff
//! - **Receive loop**: sequential handler dispatch with complete/abandon
//! - **Lock renewal**: background renewal per connection
//! - **Observer + metrics**: lifecycle callbacks and live gauges
//!
//! A [`SubscriptionHandle`] is returned by
//! [`TopicPubSub::subscribe`](crate::TopicPubSub::subscribe) and controls one
//! subscription.

pub mod handler;
pub mod lock_renewal;
pub mod metrics;
pub mod observer;
pub mod options;
pub mod receiver_loop;
pub mod session_pool;
pub(crate) mod supervisor;

pub use handler::{
    BulkEntryFailure, BulkHandlerResponse, BulkMessageHandler, HandlerError, MessageHandler,
    SubscriptionHandler,
};
pub use lock_renewal::{renew_locks_blocking, LockRenewalOptions};
pub use metrics::{MetricsSnapshot, SubscriptionMetrics};
pub use observer::{NoopObserver, SubscriptionObserver};
pub use options::{max_bulk_pub_bytes, ReceiveMode, SubscribeOptions};
pub use receiver_loop::{ConnectionState, ReceiveExit};
pub use session_pool::{SessionSlot, SessionSlotPool};

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Subscribe request from the application layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub topic: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SubscribeRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Control handle for one running subscription
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    topic: String,
    token: CancellationToken,
    tracker: TaskTracker,
    metrics: Arc<SubscriptionMetrics>,
    session_pool: Option<SessionSlotPool>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        topic: String,
        token: CancellationToken,
        tracker: TaskTracker,
        metrics: Arc<SubscriptionMetrics>,
        session_pool: Option<SessionSlotPool>,
    ) -> Self {
        Self {
            topic,
            token,
            tracker,
            metrics,
            session_pool,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop the subscription; use [`stopped`](Self::stopped) to await tear-down
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the supervisor, every session worker and every renewal loop
    /// of this subscription has exited
    pub async fn stopped(&self) {
        self.tracker.wait().await;
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Slot pool of a session subscription
    pub fn session_pool(&self) -> Option<&SessionSlotPool> {
        self.session_pool.as_ref()
    }
}
