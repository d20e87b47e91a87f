use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use pubsub_resilience::messaging::{BulkMessage, TopicMessage};
use pubsub_resilience::subscription::BulkHandlerResponse;
use pubsub_resilience::{BulkMessageHandler, HandlerError, MessageHandler};

/// Records every delivered message
#[derive(Debug, Default)]
pub struct CollectingHandler {
    messages: Mutex<Vec<TopicMessage>>,
}

impl CollectingHandler {
    pub fn count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn messages(&self) -> Vec<TopicMessage> {
        self.messages.lock().clone()
    }

    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.messages.lock().iter().map(|m| m.data.clone()).collect()
    }
}

#[async_trait]
impl MessageHandler for CollectingHandler {
    async fn handle(&self, message: TopicMessage) -> Result<(), HandlerError> {
        self.messages.lock().push(message);
        Ok(())
    }
}

/// Fails the first `failures` deliveries, then succeeds
#[derive(Debug)]
pub struct FlakyHandler {
    remaining_failures: AtomicUsize,
    inner: CollectingHandler,
}

impl FlakyHandler {
    pub fn new(failures: usize) -> Self {
        Self {
            remaining_failures: AtomicUsize::new(failures),
            inner: CollectingHandler::default(),
        }
    }

    pub fn succeeded(&self) -> Vec<TopicMessage> {
        self.inner.messages()
    }
}

#[async_trait]
impl MessageHandler for FlakyHandler {
    async fn handle(&self, message: TopicMessage) -> Result<(), HandlerError> {
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(HandlerError::failed("downstream unavailable"));
        }
        self.inner.handle(message).await
    }
}

/// Blocks every invocation until a permit is released
#[derive(Debug)]
pub struct GatedHandler {
    gate: Semaphore,
    entered: AtomicUsize,
    inner: CollectingHandler,
}

impl Default for GatedHandler {
    fn default() -> Self {
        Self {
            gate: Semaphore::new(0),
            entered: AtomicUsize::new(0),
            inner: CollectingHandler::default(),
        }
    }
}

impl GatedHandler {
    /// Let `n` blocked or future invocations finish
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::Acquire)
    }

    pub fn finished(&self) -> usize {
        self.inner.count()
    }

    pub fn messages(&self) -> Vec<TopicMessage> {
        self.inner.messages()
    }
}

#[async_trait]
impl MessageHandler for GatedHandler {
    async fn handle(&self, message: TopicMessage) -> Result<(), HandlerError> {
        self.entered.fetch_add(1, Ordering::AcqRel);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| HandlerError::failed(e.to_string()))?;
        permit.forget();
        self.inner.handle(message).await
    }
}

/// Bulk handler that rejects the first entry whose body equals `reject`;
/// its redelivery is accepted
#[derive(Debug, Default)]
pub struct SelectiveBulkHandler {
    reject: Vec<u8>,
    rejected: AtomicBool,
    batches: Mutex<Vec<BulkMessage>>,
}

impl SelectiveBulkHandler {
    pub fn rejecting_once(body: &[u8]) -> Self {
        Self {
            reject: body.to_vec(),
            ..Default::default()
        }
    }

    pub fn batches(&self) -> Vec<BulkMessage> {
        self.batches.lock().clone()
    }

    pub fn entries_seen(&self) -> usize {
        self.batches.lock().iter().map(|b| b.entries.len()).sum()
    }
}

#[async_trait]
impl BulkMessageHandler for SelectiveBulkHandler {
    async fn handle(&self, message: BulkMessage) -> Result<BulkHandlerResponse, HandlerError> {
        let mut response = BulkHandlerResponse::success();
        for entry in &message.entries {
            if entry.event == self.reject && !self.rejected.swap(true, Ordering::AcqRel) {
                response = response.with_failure(&entry.entry_id, "rejected");
            }
        }
        self.batches.lock().push(message);
        Ok(response)
    }
}
