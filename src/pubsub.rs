//! # Topic Pub/Sub
//!
//! Public entry point: publish with classified retries, all-or-nothing bulk
//! publish, and supervised subscriptions.
//!
//! ## Publish flow
//!
//! ```text
//! publish ──▶ ensure topic ──▶ SenderRegistry::get_sender ──▶ send (timeout)
//!                                                              │
//!                  ┌───────────────────────────────────────────┤
//!                  ▼                                           ▼
//!   Network: close cached sender, retry        RetriableProtocol: retry, keep sender
//!                                              Permanent: fail immediately
//! ```
//!
//! ## Lifecycle
//!
//! All publish retries and subscriptions run under one root
//! [`CancellationToken`]. [`TopicPubSub::close`] cancels it, closes every
//! cached sender, and waits (bounded) for all subscription tasks to exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::PubSubConfig;
use crate::constants::Feature;
use crate::error::{PubSubError, Result};
use crate::logging::{log_error, log_publish_operation};
use crate::messaging::{
    BrokerClient, BrokerMessage, BulkPublishRequest, BulkPublishResponse, BulkPublishStatus,
    ErrorClass, ErrorClassifier, MessagingError, PublishRequest, SenderRegistry,
    StandardErrorClassifier,
};
use crate::resilience::{retry_notify_recover, AttemptError, ExponentialBackoff, RetryError, RetryNotify};
use crate::subscription::supervisor::{run_supervisor, SupervisorContext};
use crate::subscription::{
    max_bulk_pub_bytes, BulkMessageHandler, LockRenewalOptions, MessageHandler, NoopObserver,
    SessionSlotPool, SubscribeOptions, SubscribeRequest, SubscriptionHandle, SubscriptionHandler,
    SubscriptionMetrics, SubscriptionObserver,
};

/// Resilient pub/sub component over a [`BrokerClient`]
pub struct TopicPubSub {
    config: PubSubConfig,
    client: Arc<dyn BrokerClient>,
    classifier: Arc<dyn ErrorClassifier>,
    observer: Arc<dyn SubscriptionObserver>,
    senders: SenderRegistry,
    provisioned_topics: DashSet<String>,
    root_token: CancellationToken,
    tracker: TaskTracker,
    closed: AtomicBool,
}

impl std::fmt::Debug for TopicPubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicPubSub")
            .field("consumer_id", &self.config.consumer_id)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Logs publish retries for one topic
struct PublishRetryNotify<'a> {
    topic: &'a str,
}

impl RetryNotify<MessagingError> for PublishRetryNotify<'_> {
    fn on_retry(&self, error: &MessagingError, wait: Duration) {
        warn!(
            topic = %self.topic,
            error = %error,
            wait_ms = wait.as_millis() as u64,
            "🔄 Publish failed, retrying"
        );
    }

    fn on_recovered(&self) {
        info!(topic = %self.topic, "✅ Publish recovered after retries");
    }
}

impl TopicPubSub {
    /// Validate `config` and build the component
    pub fn new(config: PubSubConfig, client: Arc<dyn BrokerClient>) -> Result<Self> {
        config.validate()?;

        info!(
            consumer_id = %config.consumer_id,
            entity_management = !config.disable_entity_management,
            "🚀 TopicPubSub initialized"
        );

        Ok(Self {
            senders: SenderRegistry::new(Arc::clone(&client), config.timeout()),
            config,
            client,
            classifier: Arc::new(StandardErrorClassifier::new()),
            observer: Arc::new(NoopObserver),
            provisioned_topics: DashSet::new(),
            root_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Replace the default error classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Observer notified of every subscription's lifecycle
    pub fn with_observer(mut self, observer: Arc<dyn SubscriptionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &PubSubConfig {
        &self.config
    }

    pub fn features(&self) -> Vec<Feature> {
        vec![Feature::MessageTtl]
    }

    pub fn sender_registry(&self) -> &SenderRegistry {
        &self.senders
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(PubSubError::Closed)
        } else {
            Ok(())
        }
    }

    fn require_topic(topic: &str) -> Result<()> {
        if topic.trim().is_empty() {
            return Err(PubSubError::configuration("topic must not be empty"));
        }
        Ok(())
    }

    async fn ensure_topic(&self, topic: &str) -> std::result::Result<(), MessagingError> {
        if self.config.disable_entity_management || self.provisioned_topics.contains(topic) {
            return Ok(());
        }
        self.client.ensure_topic(topic).await?;
        self.provisioned_topics.insert(topic.to_string());
        Ok(())
    }

    /// Publish one message, retrying retriable failures with backoff
    pub async fn publish(&self, request: &PublishRequest) -> Result<()> {
        self.ensure_open()?;
        Self::require_topic(&request.topic)?;

        let topic = request.topic.as_str();
        let message =
            BrokerMessage::from_publish_request(request).map_err(|source| PubSubError::Publish {
                topic: topic.to_string(),
                source,
            })?;

        let mut backoff = ExponentialBackoff::new(self.config.publish_backoff());
        let notify = PublishRetryNotify { topic };

        let result = retry_notify_recover(
            &self.root_token,
            &mut backoff,
            || self.publish_attempt(topic, &message),
            &notify,
        )
        .await;

        match result {
            Ok(()) => {
                debug!(topic = %topic, "📤 Published message");
                Ok(())
            }
            Err(RetryError::Permanent(source)) => {
                log_error("pubsub", "publish", &source.to_string(), Some(topic));
                Err(PubSubError::Publish {
                    topic: topic.to_string(),
                    source,
                })
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                log_publish_operation(
                    "publish",
                    topic,
                    "retries_exhausted",
                    Some(attempts),
                    None,
                    Some(&last.to_string()),
                );
                Err(PubSubError::RetriesExhausted {
                    topic: topic.to_string(),
                    attempts,
                    source: last,
                })
            }
            Err(RetryError::Cancelled) => Err(PubSubError::Cancelled),
        }
    }

    async fn publish_attempt(
        &self,
        topic: &str,
        message: &BrokerMessage,
    ) -> std::result::Result<(), AttemptError<MessagingError>> {
        // No sender is involved yet, so there is nothing to invalidate
        self.ensure_topic(topic).await.map_err(AttemptError::Protocol)?;
        let sender = self
            .senders
            .get_sender(topic)
            .await
            .map_err(AttemptError::Protocol)?;

        let timeout = self.config.timeout();
        let error = match tokio::time::timeout(timeout, sender.send_message(message.clone())).await
        {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => self.classify(e),
            Err(_) => AttemptError::Network(MessagingError::timeout(
                "send_message",
                timeout.as_secs(),
            )),
        };

        if let AttemptError::Network(e) = &error {
            debug!(topic = %topic, error = %e, "Closing cached sender after network failure");
            self.senders.close_sender(topic, &sender).await;
        }
        Err(error)
    }

    fn classify(&self, error: MessagingError) -> AttemptError<MessagingError> {
        let class = self.classifier.classify(&error);
        AttemptError::from_class(class, error)
    }

    /// Publish every entry in one broker call; all entries succeed or all fail
    pub async fn bulk_publish(&self, request: &BulkPublishRequest) -> Result<BulkPublishResponse> {
        self.ensure_open()?;
        if request.entries.is_empty() {
            return Ok(BulkPublishResponse::default());
        }
        Self::require_topic(&request.topic)?;

        let topic = request.topic.as_str();
        let max_bytes = max_bulk_pub_bytes(&request.metadata)?;
        let fail = |source: MessagingError| {
            log_error("pubsub", "bulk_publish", &source.to_string(), Some(topic));
            PubSubError::BulkPublish {
                topic: topic.to_string(),
                failed_entries: request.entries.iter().map(|e| e.entry_id.clone()).collect(),
                source,
            }
        };

        self.ensure_topic(topic).await.map_err(&fail)?;
        let sender = self.senders.get_sender(topic).await.map_err(&fail)?;

        let mut batch = sender.new_batch(max_bytes);
        for entry in &request.entries {
            let message = BrokerMessage::from_bulk_entry(entry).map_err(&fail)?;
            batch.add_message(message).map_err(&fail)?;
        }
        let count = batch.len();

        let timeout = self.config.timeout();
        let error = match tokio::time::timeout(timeout, sender.send_batch(batch)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some((self.classifier.classify(&e), e)),
            Err(_) => Some((
                ErrorClass::Network,
                MessagingError::timeout("send_batch", timeout.as_secs()),
            )),
        };

        if let Some((class, source)) = error {
            if class == ErrorClass::Network {
                self.senders.close_sender(topic, &sender).await;
            }
            return Err(fail(source));
        }

        log_publish_operation("bulk_publish", topic, "succeeded", Some(1), Some(count), None);
        Ok(BulkPublishResponse::new(
            &request.entries,
            BulkPublishStatus::Succeeded,
            None,
        ))
    }

    /// Start a supervised single-message subscription
    pub async fn subscribe(
        &self,
        request: SubscribeRequest,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionHandle> {
        self.start_subscription(request, SubscriptionHandler::Single(handler))
            .await
    }

    /// Start a supervised batch subscription
    pub async fn bulk_subscribe(
        &self,
        request: SubscribeRequest,
        handler: Arc<dyn BulkMessageHandler>,
    ) -> Result<SubscriptionHandle> {
        self.start_subscription(request, SubscriptionHandler::Bulk(handler))
            .await
    }

    async fn start_subscription(
        &self,
        request: SubscribeRequest,
        handler: SubscriptionHandler,
    ) -> Result<SubscriptionHandle> {
        self.ensure_open()?;
        Self::require_topic(&request.topic)?;

        let options = SubscribeOptions::from_metadata(&request.metadata, handler.mode())?;
        let consumer_id = self.config.consumer_id.clone();

        if !self.config.disable_entity_management {
            self.client
                .ensure_subscription(&consumer_id, &request.topic, &options.entity_options())
                .await
                .map_err(|source| PubSubError::Provisioning {
                    entity: format!("{}/{}", request.topic, consumer_id),
                    source,
                })?;
        }

        let token = self.root_token.child_token();
        let metrics = SubscriptionMetrics::new();
        let tracker = TaskTracker::new();
        let pool = options.require_sessions.then(|| {
            SessionSlotPool::new(
                options.max_concurrent_sessions,
                self.config.reconnect_backoff(),
            )
        });

        info!(
            topic = %request.topic,
            consumer_id = %consumer_id,
            mode = ?handler.mode(),
            require_sessions = options.require_sessions,
            max_concurrent_sessions = options.max_concurrent_sessions,
            "📥 Starting subscription"
        );

        let ctx = Arc::new(SupervisorContext {
            client: Arc::clone(&self.client),
            topic: request.topic.clone(),
            consumer_id,
            fetch_size: options.fetch_size(self.config.max_active_messages),
            options,
            handler,
            observer: Arc::clone(&self.observer),
            metrics: Arc::clone(&metrics),
            tracker: tracker.clone(),
            handler_timeout: self.config.handler_timeout(),
            operation_timeout: self.config.timeout(),
            renewal: LockRenewalOptions {
                interval: self.config.lock_renewal_interval(),
                timeout: self.config.timeout(),
            },
            reconnect_backoff: self.config.reconnect_backoff(),
        });

        tracker.spawn(run_supervisor(ctx, token.clone(), pool.clone()));
        tracker.close();

        let subscription_tasks = tracker.clone();
        self.tracker
            .spawn(async move { subscription_tasks.wait().await });

        Ok(SubscriptionHandle::new(
            request.topic,
            token,
            tracker,
            metrics,
            pool,
        ))
    }

    /// Stop publish retries and subscriptions, close cached senders.
    /// Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!(consumer_id = %self.config.consumer_id, "🛑 Closing TopicPubSub");
        self.root_token.cancel();
        self.senders.close_all_senders().await;

        self.tracker.close();
        let timeout = self.config.timeout();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Timed out waiting for subscriptions to stop"
            );
        }

        Ok(())
    }
}
