//! # Receive Loop
//!
//! Pulls messages from one open receiver and drives them through the handler:
//!
//! ```text
//! receive ──▶ track lock ──▶ handler (timeout) ──▶ complete / abandon ──▶ untrack
//!    ▲                                                                     │
//!    └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Messages are handled sequentially, preserving per-receiver order. The loop
//! exits when the connection token is cancelled, when the connection is marked
//! lost (fatal lock renewal failure), when a session goes idle, or on a receive
//! error. No settlement calls are issued after cancellation; closing the
//! receiver releases outstanding locks for redelivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::handler::{BulkHandlerResponse, HandlerError, SubscriptionHandler};
use super::metrics::SubscriptionMetrics;
use super::observer::SubscriptionObserver;
use crate::messaging::{BulkMessage, MessagingError, ReceivedMessage, Receiver, TopicMessage};

/// State shared by the receive loop and lock renewal of one connection
#[derive(Debug)]
pub struct ConnectionState {
    active: DashMap<String, ReceivedMessage>,
    first_success: AtomicBool,
    lost: CancellationToken,
    lost_reason: Mutex<Option<MessagingError>>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
            first_success: AtomicBool::new(false),
            lost: CancellationToken::new(),
            lost_reason: Mutex::new(None),
        }
    }

    /// Hold a message's lock for renewal
    pub fn track(&self, message: &ReceivedMessage) {
        self.active
            .insert(message.lock_token.clone(), message.clone());
    }

    pub fn untrack(&self, lock_token: &str) {
        self.active.remove(lock_token);
    }

    /// Messages currently held
    pub fn tracked(&self) -> Vec<ReceivedMessage> {
        self.active.iter().map(|e| e.value().clone()).collect()
    }

    pub fn tracked_count(&self) -> usize {
        self.active.len()
    }

    /// Set the first-success latch; true only for the call that set it
    pub fn mark_first_success(&self) -> bool {
        !self.first_success.swap(true, Ordering::AcqRel)
    }

    /// Whether the connection delivered at least one message
    pub fn had_success(&self) -> bool {
        self.first_success.load(Ordering::Acquire)
    }

    /// Mark the connection unusable; the receive loop exits with `reason`
    pub fn mark_lost(&self, reason: MessagingError) {
        self.lost_reason.lock().get_or_insert(reason);
        self.lost.cancel();
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    fn lost_reason(&self) -> MessagingError {
        self.lost_reason
            .lock()
            .clone()
            .unwrap_or(MessagingError::ReceiverClosed)
    }
}

/// How the receive loop ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveExit {
    /// The governing token was cancelled
    Cancelled,
    /// The session delivered nothing within its idle timeout
    SessionIdle,
}

/// Everything the receive loop needs besides the receiver itself
pub struct ReceiveContext<'a> {
    pub topic: &'a str,
    pub handler: &'a SubscriptionHandler,
    pub fetch_size: usize,
    pub handler_timeout: Duration,
    pub settle_timeout: Duration,
    pub session_idle_timeout: Option<Duration>,
    pub observer: &'a dyn SubscriptionObserver,
    pub metrics: &'a SubscriptionMetrics,
}

/// Outcome of one settlement; `Stop` means the loop must exit
enum Settled {
    Continue,
    Stop(Result<ReceiveExit, MessagingError>),
}

/// Receive and dispatch until cancelled, lost, idle, or a receive error
pub async fn receive_blocking(
    token: &CancellationToken,
    receiver: &Arc<dyn Receiver>,
    state: &ConnectionState,
    ctx: &ReceiveContext<'_>,
) -> Result<ReceiveExit, MessagingError> {
    let session_id = receiver.session_id();

    loop {
        let fetch = async {
            let receive = receiver.receive_messages(ctx.fetch_size);
            match ctx.session_idle_timeout {
                Some(idle) => tokio::time::timeout(idle, receive).await.ok(),
                None => Some(receive.await),
            }
        };

        let messages = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(ReceiveExit::Cancelled),
            _ = state.lost.cancelled() => return Err(state.lost_reason()),
            fetched = fetch => match fetched {
                None => {
                    debug!(topic = %ctx.topic, session_id = ?session_id, "Session idle, ending receive");
                    return Ok(ReceiveExit::SessionIdle);
                }
                Some(Ok(messages)) => messages,
                Some(Err(e)) => return Err(e),
            },
        };

        if messages.is_empty() {
            continue;
        }

        ctx.metrics.record_received(messages.len());
        if state.mark_first_success() {
            ctx.observer.on_first_success(ctx.topic, session_id);
        }
        for message in &messages {
            state.track(message);
        }

        let settled = match ctx.handler {
            SubscriptionHandler::Single(_) => {
                dispatch_single(token, receiver, state, ctx, &messages).await
            }
            SubscriptionHandler::Bulk(_) => {
                dispatch_bulk(token, receiver, state, ctx, &messages).await
            }
        };

        if let Settled::Stop(result) = settled {
            return result;
        }
    }
}

async fn dispatch_single(
    token: &CancellationToken,
    receiver: &Arc<dyn Receiver>,
    state: &ConnectionState,
    ctx: &ReceiveContext<'_>,
    messages: &[ReceivedMessage],
) -> Settled {
    let SubscriptionHandler::Single(handler) = ctx.handler else {
        return Settled::Continue;
    };

    for message in messages {
        let invocation = tokio::time::timeout(
            ctx.handler_timeout,
            handler.handle(TopicMessage::from_received(ctx.topic, message)),
        );

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Settled::Stop(Ok(ReceiveExit::Cancelled)),
            outcome = invocation => flatten_timeout(outcome, ctx.handler_timeout),
        };

        if let Err(e) = &outcome {
            warn!(
                topic = %ctx.topic,
                message_id = %message.message_id,
                error = %e,
                "Handler failed, abandoning message"
            );
        }

        if let Settled::Stop(result) =
            settle(token, receiver, state, ctx, message, outcome.is_ok()).await
        {
            return Settled::Stop(result);
        }
    }

    Settled::Continue
}

async fn dispatch_bulk(
    token: &CancellationToken,
    receiver: &Arc<dyn Receiver>,
    state: &ConnectionState,
    ctx: &ReceiveContext<'_>,
    messages: &[ReceivedMessage],
) -> Settled {
    let SubscriptionHandler::Bulk(handler) = ctx.handler else {
        return Settled::Continue;
    };

    let invocation = tokio::time::timeout(
        ctx.handler_timeout,
        handler.handle(BulkMessage::from_received(ctx.topic, messages)),
    );

    let outcome: Result<BulkHandlerResponse, HandlerError> = tokio::select! {
        biased;
        _ = token.cancelled() => return Settled::Stop(Ok(ReceiveExit::Cancelled)),
        outcome = invocation => flatten_timeout(outcome, ctx.handler_timeout),
    };

    let response = match outcome {
        Ok(response) => Some(response),
        Err(e) => {
            warn!(
                topic = %ctx.topic,
                messages = messages.len(),
                error = %e,
                "Bulk handler failed, abandoning batch"
            );
            None
        }
    };

    let failed = response.as_ref().map(BulkHandlerResponse::failed_ids);
    for message in messages {
        let success = failed
            .as_ref()
            .is_some_and(|ids| !ids.contains(message.message_id.as_str()));
        if let Settled::Stop(result) = settle(token, receiver, state, ctx, message, success).await
        {
            return Settled::Stop(result);
        }
    }

    Settled::Continue
}

async fn settle(
    token: &CancellationToken,
    receiver: &Arc<dyn Receiver>,
    state: &ConnectionState,
    ctx: &ReceiveContext<'_>,
    message: &ReceivedMessage,
    success: bool,
) -> Settled {
    if token.is_cancelled() {
        return Settled::Stop(Ok(ReceiveExit::Cancelled));
    }

    let call = async {
        if success {
            receiver.complete_message(message).await
        } else {
            receiver.abandon_message(message).await
        }
    };
    let result = match tokio::time::timeout(ctx.settle_timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(MessagingError::timeout(
            if success { "complete" } else { "abandon" },
            ctx.settle_timeout.as_secs(),
        )),
    };

    state.untrack(&message.lock_token);

    match result {
        Ok(()) if success => ctx.metrics.record_completed(),
        Ok(()) => ctx.metrics.record_abandoned(),
        Err(e) if e.is_receiver_fatal() => return Settled::Stop(Err(e)),
        Err(e) => warn!(
            topic = %ctx.topic,
            message_id = %message.message_id,
            error = %e,
            "Failed to settle message"
        ),
    }

    Settled::Continue
}

fn flatten_timeout<T>(
    outcome: Result<Result<T, HandlerError>, tokio::time::error::Elapsed>,
    timeout: Duration,
) -> Result<T, HandlerError> {
    outcome.unwrap_or(Err(HandlerError::Timeout {
        timeout_ms: timeout.as_millis() as u64,
    }))
}
