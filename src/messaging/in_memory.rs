//! # In-Memory Broker
//!
//! Thread-safe in-memory [`BrokerClient`] for testing and development.
//!
//! ## Features
//!
//! - **Peek-lock delivery**: received messages stay locked until completed or
//!   abandoned; closing a receiver returns its locked messages to the queue
//! - **Sessions**: session-enabled subscriptions hand each session to at most
//!   one receiver at a time
//! - **Entity management**: topics and subscriptions are auto-provisioned unless
//!   disabled
//! - **Fault injection**: queue errors for the next connects, sends or renewals,
//!   or expire a session lock
//! - **Counters**: sender/receiver lifecycle and call counts for assertions
//!
//! No durability: this is a collaborator for exercising the engine, not a broker.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use super::broker::{BrokerClient, Receiver, Sender, SubscriptionEntityOptions};
use super::errors::MessagingError;
use super::message::{BrokerMessage, MessageBatch, ReceivedMessage};

/// Message held by a receiver, tagged with the receiver that holds it
#[derive(Debug, Clone)]
struct LockedMessage {
    receiver_id: u64,
    message: ReceivedMessage,
}

#[derive(Debug, Default)]
struct SubscriptionEntity {
    require_sessions: bool,
    available: VecDeque<ReceivedMessage>,
    locked: HashMap<String, LockedMessage>,
    locked_sessions: HashSet<String>,
    lost_sessions: HashSet<String>,
}

impl SubscriptionEntity {
    /// Reinsert a message in sequence order so redelivery preserves ordering
    fn requeue(&mut self, message: ReceivedMessage) {
        let position = self
            .available
            .iter()
            .position(|m| m.sequence_number > message.sequence_number);
        match position {
            Some(index) => self.available.insert(index, message),
            None => self.available.push_back(message),
        }
    }

    fn take_batch(
        &mut self,
        receiver_id: u64,
        session_id: Option<&str>,
        max_messages: usize,
    ) -> Vec<ReceivedMessage> {
        let mut batch = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.available.len());

        while let Some(mut message) = self.available.pop_front() {
            let eligible = batch.len() < max_messages
                && match session_id {
                    Some(session) => message.session_id.as_deref() == Some(session),
                    None => true,
                };
            if !eligible {
                remaining.push_back(message);
                continue;
            }

            message.lock_token = Uuid::new_v4().to_string();
            message.delivery_count += 1;
            self.locked.insert(
                message.lock_token.clone(),
                LockedMessage {
                    receiver_id,
                    message: message.clone(),
                },
            );
            batch.push(message);
        }

        self.available = remaining;
        batch
    }

    fn next_unlocked_session(&self) -> Option<String> {
        self.available
            .iter()
            .filter_map(|m| m.session_id.as_ref())
            .find(|s| !self.locked_sessions.contains(*s))
            .cloned()
    }
}

#[derive(Debug, Default)]
struct TopicEntity {
    subscriptions: HashMap<String, SubscriptionEntity>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, TopicEntity>,
}

impl BrokerState {
    fn subscription_mut(
        &mut self,
        topic: &str,
        consumer_id: &str,
    ) -> Result<&mut SubscriptionEntity, MessagingError> {
        self.topics
            .get_mut(topic)
            .and_then(|t| t.subscriptions.get_mut(consumer_id))
            .ok_or_else(|| MessagingError::entity_not_found(format!("{topic}/{consumer_id}")))
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    connect: VecDeque<MessagingError>,
    send: VecDeque<MessagingError>,
    renew: VecDeque<MessagingError>,
}

#[derive(Debug, Default)]
struct Counters {
    senders_created: AtomicU64,
    senders_closed: AtomicU64,
    send_calls: AtomicU64,
    messages_published: AtomicU64,
    connect_attempts: AtomicU64,
    receivers_opened: AtomicU64,
    receivers_closed: AtomicU64,
    open_receivers: AtomicUsize,
    max_open_receivers: AtomicUsize,
    message_lock_renewals: AtomicU64,
    session_lock_renewals: AtomicU64,
    completed: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time snapshot of the broker counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStats {
    pub senders_created: u64,
    pub senders_closed: u64,
    pub send_calls: u64,
    pub messages_published: u64,
    pub connect_attempts: u64,
    pub receivers_opened: u64,
    pub receivers_closed: u64,
    pub open_receivers: usize,
    pub max_open_receivers: usize,
    pub message_lock_renewals: u64,
    pub session_lock_renewals: u64,
    pub completed: u64,
    pub abandoned: u64,
}

#[derive(Debug)]
struct BrokerInner {
    entity_management: bool,
    state: Mutex<BrokerState>,
    faults: Mutex<FaultPlan>,
    counters: Counters,
    notify: Notify,
    next_sequence: AtomicI64,
    next_receiver_id: AtomicU64,
}

impl BrokerInner {
    fn deliver(&self, topic: &str, messages: Vec<BrokerMessage>) -> Result<(), MessagingError> {
        {
            let mut state = self.state.lock();
            let entity = state
                .topics
                .get_mut(topic)
                .ok_or_else(|| MessagingError::entity_not_found(topic))?;

            for message in messages {
                let sequence_number = self.next_sequence.fetch_add(1, Ordering::Relaxed);
                let received = ReceivedMessage {
                    message_id: message
                        .message_id
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    lock_token: String::new(),
                    sequence_number,
                    body: message.body.clone(),
                    content_type: message.content_type.clone(),
                    session_id: message.session_id.clone(),
                    delivery_count: 0,
                    enqueued_at: Utc::now(),
                    application_properties: message.application_properties.clone(),
                };
                for subscription in entity.subscriptions.values_mut() {
                    subscription.available.push_back(received.clone());
                }
                self.counters
                    .messages_published
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    fn take_connect_fault(&self) -> Option<MessagingError> {
        self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);
        self.faults.lock().connect.pop_front()
    }

    fn receiver_opened(&self) {
        self.counters.receivers_opened.fetch_add(1, Ordering::Relaxed);
        let open = self.counters.open_receivers.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters
            .max_open_receivers
            .fetch_max(open, Ordering::AcqRel);
    }
}

/// In-memory broker implementing [`BrokerClient`]
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create a broker that auto-provisions topics and subscriptions
    pub fn new() -> Self {
        Self::with_entity_management(true)
    }

    /// Create a broker where `ensure_*` calls are no-ops and entities must be
    /// created up front with [`create_topic`](Self::create_topic) /
    /// [`create_subscription`](Self::create_subscription)
    pub fn without_entity_management() -> Self {
        Self::with_entity_management(false)
    }

    fn with_entity_management(entity_management: bool) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                entity_management,
                state: Mutex::new(BrokerState::default()),
                faults: Mutex::new(FaultPlan::default()),
                counters: Counters::default(),
                notify: Notify::new(),
                next_sequence: AtomicI64::new(1),
                next_receiver_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn create_topic(&self, topic: &str) {
        self.inner
            .state
            .lock()
            .topics
            .entry(topic.to_string())
            .or_default();
    }

    pub fn create_subscription(&self, topic: &str, consumer_id: &str, require_sessions: bool) {
        let mut state = self.inner.state.lock();
        let entity = state.topics.entry(topic.to_string()).or_default();
        entity
            .subscriptions
            .entry(consumer_id.to_string())
            .or_insert_with(|| SubscriptionEntity {
                require_sessions,
                ..Default::default()
            });
    }

    pub fn topic_exists(&self, topic: &str) -> bool {
        self.inner.state.lock().topics.contains_key(topic)
    }

    pub fn subscription_requires_sessions(&self, topic: &str, consumer_id: &str) -> Option<bool> {
        self.inner
            .state
            .lock()
            .topics
            .get(topic)
            .and_then(|t| t.subscriptions.get(consumer_id))
            .map(|s| s.require_sessions)
    }

    /// Deliver a message to every subscription of `topic` without a sender
    pub fn send_to_topic(&self, topic: &str, message: BrokerMessage) -> Result<(), MessagingError> {
        self.inner.deliver(topic, vec![message])
    }

    /// Messages waiting plus messages locked on a subscription
    pub fn pending_messages(&self, topic: &str, consumer_id: &str) -> usize {
        let mut state = self.inner.state.lock();
        state
            .subscription_mut(topic, consumer_id)
            .map(|s| s.available.len() + s.locked.len())
            .unwrap_or(0)
    }

    /// Fail the next connect/accept calls with these errors, in order
    pub fn fail_next_connects(&self, errors: impl IntoIterator<Item = MessagingError>) {
        self.inner.faults.lock().connect.extend(errors);
    }

    /// Fail the next send calls (single or batch) with these errors, in order
    pub fn fail_next_sends(&self, errors: impl IntoIterator<Item = MessagingError>) {
        self.inner.faults.lock().send.extend(errors);
    }

    /// Fail the next lock renewal calls with these errors, in order
    pub fn fail_next_renewals(&self, errors: impl IntoIterator<Item = MessagingError>) {
        self.inner.faults.lock().renew.extend(errors);
    }

    /// Mark a session's lock as lost; its receiver fails on the next call
    pub fn expire_session_lock(&self, topic: &str, consumer_id: &str, session_id: &str) {
        {
            let mut state = self.inner.state.lock();
            if let Ok(subscription) = state.subscription_mut(topic, consumer_id) {
                subscription.lost_sessions.insert(session_id.to_string());
            }
        }
        self.inner.notify.notify_waiters();
    }

    pub fn stats(&self) -> BrokerStats {
        let c = &self.inner.counters;
        BrokerStats {
            senders_created: c.senders_created.load(Ordering::Acquire),
            senders_closed: c.senders_closed.load(Ordering::Acquire),
            send_calls: c.send_calls.load(Ordering::Acquire),
            messages_published: c.messages_published.load(Ordering::Acquire),
            connect_attempts: c.connect_attempts.load(Ordering::Acquire),
            receivers_opened: c.receivers_opened.load(Ordering::Acquire),
            receivers_closed: c.receivers_closed.load(Ordering::Acquire),
            open_receivers: c.open_receivers.load(Ordering::Acquire),
            max_open_receivers: c.max_open_receivers.load(Ordering::Acquire),
            message_lock_renewals: c.message_lock_renewals.load(Ordering::Acquire),
            session_lock_renewals: c.session_lock_renewals.load(Ordering::Acquire),
            completed: c.completed.load(Ordering::Acquire),
            abandoned: c.abandoned.load(Ordering::Acquire),
        }
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn ensure_topic(&self, topic: &str) -> Result<(), MessagingError> {
        if self.inner.entity_management {
            self.create_topic(topic);
        }
        Ok(())
    }

    async fn ensure_subscription(
        &self,
        consumer_id: &str,
        topic: &str,
        options: &SubscriptionEntityOptions,
    ) -> Result<(), MessagingError> {
        if self.inner.entity_management {
            self.create_subscription(topic, consumer_id, options.require_sessions);
        }
        Ok(())
    }

    async fn create_sender(&self, topic: &str) -> Result<Arc<dyn Sender>, MessagingError> {
        if !self.topic_exists(topic) {
            return Err(MessagingError::entity_not_found(topic));
        }
        self.inner
            .counters
            .senders_created
            .fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(InMemorySender {
            broker: Arc::clone(&self.inner),
            topic: topic.to_string(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn new_receiver(
        &self,
        topic: &str,
        consumer_id: &str,
    ) -> Result<Arc<dyn Receiver>, MessagingError> {
        if let Some(err) = self.inner.take_connect_fault() {
            return Err(err);
        }
        {
            let mut state = self.inner.state.lock();
            let subscription = state.subscription_mut(topic, consumer_id)?;
            if subscription.require_sessions {
                return Err(MessagingError::configuration(
                    "receiver",
                    format!("subscription {topic}/{consumer_id} requires sessions"),
                ));
            }
        }

        self.inner.receiver_opened();
        Ok(Arc::new(InMemoryReceiver::new(
            Arc::clone(&self.inner),
            topic,
            consumer_id,
            None,
        )))
    }

    async fn accept_next_session(
        &self,
        topic: &str,
        consumer_id: &str,
    ) -> Result<Arc<dyn Receiver>, MessagingError> {
        if let Some(err) = self.inner.take_connect_fault() {
            return Err(err);
        }

        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                let subscription = state.subscription_mut(topic, consumer_id)?;
                if let Some(session_id) = subscription.next_unlocked_session() {
                    subscription.locked_sessions.insert(session_id.clone());
                    subscription.lost_sessions.remove(&session_id);
                    drop(state);

                    debug!(topic = %topic, session_id = %session_id, "Session accepted");
                    self.inner.receiver_opened();
                    return Ok(Arc::new(InMemoryReceiver::new(
                        Arc::clone(&self.inner),
                        topic,
                        consumer_id,
                        Some(session_id),
                    )));
                }
            }

            notified.await;
        }
    }
}

#[derive(Debug)]
struct InMemorySender {
    broker: Arc<BrokerInner>,
    topic: String,
    closed: AtomicBool,
}

impl InMemorySender {
    fn check_send(&self) -> Result<(), MessagingError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MessagingError::sender_closed(&self.topic));
        }
        self.broker
            .counters
            .send_calls
            .fetch_add(1, Ordering::Relaxed);
        match self.broker.faults.lock().send.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Sender for InMemorySender {
    async fn send_message(&self, message: BrokerMessage) -> Result<(), MessagingError> {
        self.check_send()?;
        self.broker.deliver(&self.topic, vec![message])
    }

    async fn send_batch(&self, batch: MessageBatch) -> Result<(), MessagingError> {
        self.check_send()?;
        self.broker.deliver(&self.topic, batch.into_messages())
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.broker
                .counters
                .senders_closed
                .fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct InMemoryReceiver {
    broker: Arc<BrokerInner>,
    id: u64,
    topic: String,
    consumer_id: String,
    session_id: Option<String>,
    closed: AtomicBool,
}

impl InMemoryReceiver {
    fn new(
        broker: Arc<BrokerInner>,
        topic: &str,
        consumer_id: &str,
        session_id: Option<String>,
    ) -> Self {
        let id = broker.next_receiver_id.fetch_add(1, Ordering::Relaxed);
        Self {
            broker,
            id,
            topic: topic.to_string(),
            consumer_id: consumer_id.to_string(),
            session_id,
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), MessagingError> {
        if self.closed.load(Ordering::Acquire) {
            Err(MessagingError::ReceiverClosed)
        } else {
            Ok(())
        }
    }

    fn check_session(&self, subscription: &SubscriptionEntity) -> Result<(), MessagingError> {
        match &self.session_id {
            Some(session) if subscription.lost_sessions.contains(session) => {
                Err(MessagingError::session_lock_lost(session))
            }
            _ => Ok(()),
        }
    }

    fn take_renew_fault(&self) -> Option<MessagingError> {
        self.broker.faults.lock().renew.pop_front()
    }

    fn settle(&self, message: &ReceivedMessage, requeue: bool) -> Result<(), MessagingError> {
        self.check_open()?;
        {
            let mut state = self.broker.state.lock();
            let subscription = state.subscription_mut(&self.topic, &self.consumer_id)?;
            let locked = subscription
                .locked
                .remove(&message.lock_token)
                .ok_or_else(|| MessagingError::lock_lost(&message.lock_token))?;
            if requeue {
                subscription.requeue(locked.message);
            }
        }
        if requeue {
            self.broker.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            self.broker.notify.notify_waiters();
        } else {
            self.broker.counters.completed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[async_trait]
impl Receiver for InMemoryReceiver {
    async fn receive_messages(
        &self,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, MessagingError> {
        let max_messages = max_messages.max(1);
        loop {
            let notified = self.broker.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_open()?;
            {
                let mut state = self.broker.state.lock();
                let subscription = state.subscription_mut(&self.topic, &self.consumer_id)?;
                self.check_session(subscription)?;
                let batch =
                    subscription.take_batch(self.id, self.session_id.as_deref(), max_messages);
                if !batch.is_empty() {
                    return Ok(batch);
                }
            }

            notified.await;
        }
    }

    async fn complete_message(&self, message: &ReceivedMessage) -> Result<(), MessagingError> {
        self.settle(message, false)
    }

    async fn abandon_message(&self, message: &ReceivedMessage) -> Result<(), MessagingError> {
        self.settle(message, true)
    }

    async fn renew_message_lock(&self, message: &ReceivedMessage) -> Result<(), MessagingError> {
        self.check_open()?;
        if let Some(err) = self.take_renew_fault() {
            return Err(err);
        }
        let mut state = self.broker.state.lock();
        let subscription = state.subscription_mut(&self.topic, &self.consumer_id)?;
        if !subscription.locked.contains_key(&message.lock_token) {
            return Err(MessagingError::lock_lost(&message.lock_token));
        }
        self.broker
            .counters
            .message_lock_renewals
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn renew_session_lock(&self) -> Result<(), MessagingError> {
        self.check_open()?;
        if self.session_id.is_none() {
            return Err(MessagingError::internal(
                "session lock renewal on a non-session receiver",
            ));
        }
        if let Some(err) = self.take_renew_fault() {
            return Err(err);
        }
        let mut state = self.broker.state.lock();
        let subscription = state.subscription_mut(&self.topic, &self.consumer_id)?;
        self.check_session(subscription)?;
        self.broker
            .counters
            .session_lock_renewals
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let mut state = self.broker.state.lock();
            if let Ok(subscription) = state.subscription_mut(&self.topic, &self.consumer_id) {
                let held: Vec<String> = subscription
                    .locked
                    .iter()
                    .filter(|(_, l)| l.receiver_id == self.id)
                    .map(|(token, _)| token.clone())
                    .collect();
                for token in held {
                    if let Some(locked) = subscription.locked.remove(&token) {
                        subscription.requeue(locked.message);
                    }
                }
                if let Some(session) = &self.session_id {
                    subscription.locked_sessions.remove(session);
                    subscription.lost_sessions.remove(session);
                }
            }
        }

        self.broker
            .counters
            .receivers_closed
            .fetch_add(1, Ordering::Relaxed);
        self.broker
            .counters
            .open_receivers
            .fetch_sub(1, Ordering::AcqRel);
        self.broker.notify.notify_waiters();
        Ok(())
    }
}
