//! # Sender Registry
//!
//! Owned get-or-create cache of topic senders shared by every publish call.
//!
//! - Readers holding a valid sender use it concurrently (shared read lock).
//! - Creation happens under the topic's write lock with a double check, so two
//!   racing publishers never open duplicate senders.
//! - Invalidation takes the sender out of its slot under the same write lock and
//!   closes it afterwards; the next publish lazily creates a fresh one. A slot
//!   that already holds a replacement is left alone.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::broker::{BrokerClient, Sender};
use super::errors::MessagingError;

type SenderSlot = Arc<RwLock<Option<Arc<dyn Sender>>>>;

#[derive(Debug)]
pub struct SenderRegistry {
    client: Arc<dyn BrokerClient>,
    senders: DashMap<String, SenderSlot>,
    close_timeout: Duration,
}

impl SenderRegistry {
    pub fn new(client: Arc<dyn BrokerClient>, close_timeout: Duration) -> Self {
        Self {
            client,
            senders: DashMap::new(),
            close_timeout,
        }
    }

    fn slot(&self, topic: &str) -> SenderSlot {
        self.senders
            .entry(topic.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Return the cached sender for `topic`, creating it if needed
    pub async fn get_sender(&self, topic: &str) -> Result<Arc<dyn Sender>, MessagingError> {
        let slot = self.slot(topic);

        if let Some(sender) = slot.read().await.as_ref() {
            return Ok(Arc::clone(sender));
        }

        let mut guard = slot.write().await;
        if let Some(sender) = guard.as_ref() {
            return Ok(Arc::clone(sender));
        }

        debug!(topic = %topic, "📤 Creating sender");
        let sender = self.client.create_sender(topic).await?;
        *guard = Some(Arc::clone(&sender));
        Ok(sender)
    }

    /// Evict and close `failed` if it is still the cached sender for `topic`
    pub async fn close_sender(&self, topic: &str, failed: &Arc<dyn Sender>) {
        let Some(slot) = self.senders.get(topic).map(|s| s.value().clone()) else {
            return;
        };

        let sender = {
            let mut guard = slot.write().await;
            match guard.as_ref() {
                Some(cached) if Arc::ptr_eq(cached, failed) => guard.take(),
                _ => None,
            }
        };

        match sender {
            Some(sender) => {
                debug!(topic = %topic, "Closing cached sender");
                self.close_with_timeout(topic, sender).await;
            }
            None => debug!(topic = %topic, "Sender already replaced, keeping cached sender"),
        }
    }

    /// Evict and close every cached sender
    pub async fn close_all_senders(&self) {
        let slots: Vec<(String, SenderSlot)> = self
            .senders
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut closing = Vec::with_capacity(slots.len());
        for (topic, slot) in slots {
            if let Some(sender) = slot.write().await.take() {
                closing.push(async move { self.close_with_timeout(&topic, sender).await });
            }
        }

        let count = closing.len();
        futures::future::join_all(closing).await;
        self.senders.clear();

        if count > 0 {
            info!(closed = count, "✅ Closed all cached senders");
        }
    }

    /// Whether a live sender is cached for `topic`
    pub async fn has_sender(&self, topic: &str) -> bool {
        match self.senders.get(topic).map(|s| s.value().clone()) {
            Some(slot) => slot.read().await.is_some(),
            None => false,
        }
    }

    async fn close_with_timeout(&self, topic: &str, sender: Arc<dyn Sender>) {
        match tokio::time::timeout(self.close_timeout, sender.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(topic = %topic, error = %e, "Error closing sender"),
            Err(_) => warn!(
                topic = %topic,
                timeout_ms = self.close_timeout.as_millis() as u64,
                "Timed out closing sender"
            ),
        }
    }
}
