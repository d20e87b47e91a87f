//! # Connection Supervisor
//!
//! Keeps a subscription connected until its governing token is cancelled.
//!
//! ```text
//! Connecting ──▶ Receiving (+ Renewing) ──▶ ClosingReceiver ──▶ Idle ──▶ Connecting
//!      │                                                          │
//!      └──────────────────── token cancelled ─────────────────────┴──▶ Stopped
//! ```
//!
//! - **Non-session**: one sequential loop owning one reconnect backoff. Connect
//!   failures count as a lost connection. The backoff is reset when the previous
//!   connection delivered at least one message.
//! - **Session mode**: a dispatcher acquires a [`SessionSlot`] and spawns exactly
//!   one worker bound to it. The worker accepts a session, receives until the
//!   session idles out or fails, closes the receiver and, only after a failure,
//!   waits its slot's backoff before giving the slot back. The dispatcher
//!   drains its workers before the subscription reports stopped.
//!
//! ### Cancellation semantics
//! - Every connection runs under a child of the governing token; renewal runs
//!   under a child of the connection token.
//! - Tear-down order is fixed: cancel connection token, await renewal, close the
//!   receiver with its own timeout (independent of the cancelled token).
//! - Cancellation is a normal stop, logged at debug, never as a failure.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::handler::SubscriptionHandler;
use super::lock_renewal::{renew_locks_blocking, LockRenewalOptions};
use super::metrics::SubscriptionMetrics;
use super::observer::SubscriptionObserver;
use super::options::SubscribeOptions;
use super::receiver_loop::{receive_blocking, ConnectionState, ReceiveContext, ReceiveExit};
use super::session_pool::{SessionSlot, SessionSlotPool};
use crate::logging::log_subscription_operation;
use crate::messaging::{BrokerClient, MessagingError, Receiver};
use crate::resilience::{BackoffConfig, ExponentialBackoff};

/// Shared, immutable inputs of one subscription
pub(crate) struct SupervisorContext {
    pub client: Arc<dyn BrokerClient>,
    pub topic: String,
    pub consumer_id: String,
    pub options: SubscribeOptions,
    pub handler: SubscriptionHandler,
    pub observer: Arc<dyn SubscriptionObserver>,
    pub metrics: Arc<SubscriptionMetrics>,
    pub tracker: TaskTracker,
    pub fetch_size: usize,
    pub handler_timeout: Duration,
    pub operation_timeout: Duration,
    pub renewal: LockRenewalOptions,
    pub reconnect_backoff: BackoffConfig,
}

/// How one connection lifecycle ended
#[derive(Debug)]
enum ConnectionEnd {
    Cancelled,
    SessionIdle,
    Lost(MessagingError),
}

#[derive(Debug)]
struct ConnectionOutcome {
    had_success: bool,
    end: ConnectionEnd,
}

/// Run the supervisor for one subscription until `token` is cancelled
pub(crate) async fn run_supervisor(
    ctx: Arc<SupervisorContext>,
    token: CancellationToken,
    pool: Option<SessionSlotPool>,
) {
    log_subscription_operation(
        "subscribe",
        &ctx.topic,
        &ctx.consumer_id,
        None,
        "started",
        Some(if pool.is_some() { "session" } else { "single" }),
    );

    match pool {
        Some(pool) => run_session_dispatcher(Arc::clone(&ctx), token, pool).await,
        None => run_single_receiver(&ctx, &token).await,
    }

    debug!(topic = %ctx.topic, "Subscription supervisor stopped");
    ctx.observer.on_stopped(&ctx.topic);
}

async fn run_single_receiver(ctx: &Arc<SupervisorContext>, token: &CancellationToken) {
    let mut backoff = ExponentialBackoff::new(ctx.reconnect_backoff);

    loop {
        if token.is_cancelled() {
            break;
        }

        let outcome = connect_and_receive(ctx, token, false).await;
        match outcome.end {
            ConnectionEnd::Cancelled => break,
            ConnectionEnd::SessionIdle => {}
            ConnectionEnd::Lost(e) => {
                if token.is_cancelled() {
                    break;
                }
                record_lost(ctx, None, &e);
            }
        }

        if outcome.had_success {
            backoff.reset();
        }

        let Some(delay) = backoff.next() else {
            warn!(topic = %ctx.topic, "Reconnect backoff exhausted, stopping subscription");
            break;
        };
        if !wait_before_reconnect(ctx, token, delay).await {
            break;
        }
    }
}

async fn run_session_dispatcher(
    ctx: Arc<SupervisorContext>,
    token: CancellationToken,
    pool: SessionSlotPool,
) {
    info!(
        topic = %ctx.topic,
        max_concurrent_sessions = pool.capacity(),
        "🧩 Session dispatcher started"
    );

    let workers = TaskTracker::new();
    while let Some(slot) = pool.acquire(&token).await {
        let worker_ctx = Arc::clone(&ctx);
        let worker_token = token.clone();
        workers.spawn(async move { run_session_worker(worker_ctx, worker_token, slot).await });
    }

    // Every worker closes its receiver before the subscription reports stopped
    workers.close();
    debug!(topic = %ctx.topic, workers = workers.len(), "Waiting for session workers");
    workers.wait().await;

    debug!(topic = %ctx.topic, "Session dispatcher stopped");
}

async fn run_session_worker(
    ctx: Arc<SupervisorContext>,
    token: CancellationToken,
    mut slot: SessionSlot,
) {
    let slot_id = slot.id();
    let outcome = connect_and_receive(&ctx, &token, true).await;

    if outcome.had_success {
        if let Some(backoff) = slot.backoff_mut() {
            backoff.reset();
        }
    }

    match outcome.end {
        ConnectionEnd::Cancelled => {}
        ConnectionEnd::SessionIdle => {
            debug!(topic = %ctx.topic, slot = slot_id, "Session idle, releasing slot");
        }
        ConnectionEnd::Lost(e) => {
            if token.is_cancelled() {
                return;
            }
            record_lost(&ctx, Some(slot_id), &e);
            let delay = slot.backoff_mut().and_then(ExponentialBackoff::next);
            if let Some(delay) = delay {
                wait_before_reconnect(&ctx, &token, delay).await;
            }
        }
    }
    // Slot released on drop
}

/// Open a receiver, run receive and renewal, then tear everything down
async fn connect_and_receive(
    ctx: &Arc<SupervisorContext>,
    token: &CancellationToken,
    session: bool,
) -> ConnectionOutcome {
    let connect = async {
        if session {
            ctx.client
                .accept_next_session(&ctx.topic, &ctx.consumer_id)
                .await
        } else {
            ctx.client.new_receiver(&ctx.topic, &ctx.consumer_id).await
        }
    };

    let receiver: Arc<dyn Receiver> = tokio::select! {
        biased;
        _ = token.cancelled() => {
            return ConnectionOutcome { had_success: false, end: ConnectionEnd::Cancelled };
        }
        result = connect => match result {
            Ok(receiver) => receiver,
            Err(e) => {
                return ConnectionOutcome { had_success: false, end: ConnectionEnd::Lost(e) };
            }
        },
    };

    let receiver_gauge = ctx.metrics.receiver_opened();
    let session_id = receiver.session_id().map(str::to_string);
    info!(
        topic = %ctx.topic,
        consumer_id = %ctx.consumer_id,
        session_id = ?session_id,
        "📥 Receiver connected"
    );
    ctx.observer.on_connected(&ctx.topic, session_id.as_deref());

    let connection_token = token.child_token();
    let state = Arc::new(ConnectionState::new());

    let renewal = {
        let renewal_token = connection_token.child_token();
        let receiver = Arc::clone(&receiver);
        let state = Arc::clone(&state);
        let metrics = Arc::clone(&ctx.metrics);
        let observer = Arc::clone(&ctx.observer);
        let topic = ctx.topic.clone();
        let options = ctx.renewal;
        ctx.tracker.spawn(async move {
            let _gauge = metrics.renewal_loop_started();
            if let Err(e) = renew_locks_blocking(&renewal_token, &receiver, &state, options).await
            {
                warn!(topic = %topic, error = %e, "🔒 Lock renewal stopped, connection lost");
                observer.on_lock_renewal_failed(&topic, &e);
                state.mark_lost(e);
            }
        })
    };

    let receive_ctx = ReceiveContext {
        topic: &ctx.topic,
        handler: &ctx.handler,
        fetch_size: ctx.fetch_size,
        handler_timeout: ctx.handler_timeout,
        settle_timeout: ctx.operation_timeout,
        session_idle_timeout: ctx.options.idle_timeout(),
        observer: ctx.observer.as_ref(),
        metrics: &ctx.metrics,
    };
    let result = receive_blocking(&connection_token, &receiver, &state, &receive_ctx).await;

    connection_token.cancel();
    if let Err(e) = renewal.await {
        warn!(topic = %ctx.topic, error = %e, "Lock renewal task panicked");
    }

    close_receiver(ctx, &receiver, session_id.as_deref()).await;
    drop(receiver_gauge);

    ConnectionOutcome {
        had_success: state.had_success(),
        end: match result {
            Ok(ReceiveExit::Cancelled) => ConnectionEnd::Cancelled,
            Ok(ReceiveExit::SessionIdle) => ConnectionEnd::SessionIdle,
            Err(e) => ConnectionEnd::Lost(e),
        },
    }
}

async fn close_receiver(
    ctx: &SupervisorContext,
    receiver: &Arc<dyn Receiver>,
    session_id: Option<&str>,
) {
    match tokio::time::timeout(ctx.operation_timeout, receiver.close()).await {
        Ok(Ok(())) => debug!(topic = %ctx.topic, session_id = ?session_id, "Receiver closed"),
        Ok(Err(e)) => warn!(topic = %ctx.topic, error = %e, "Error closing receiver"),
        Err(_) => warn!(
            topic = %ctx.topic,
            timeout_ms = ctx.operation_timeout.as_millis() as u64,
            "Timed out closing receiver"
        ),
    }
    ctx.observer.on_receiver_closed(&ctx.topic, session_id);
}

fn record_lost(ctx: &SupervisorContext, slot: Option<usize>, error: &MessagingError) {
    warn!(
        topic = %ctx.topic,
        consumer_id = %ctx.consumer_id,
        slot = ?slot,
        error = %error,
        "⚠️ Subscription connection lost"
    );
    ctx.metrics.record_connection_failure();
    ctx.observer.on_connection_lost(&ctx.topic, error);
}

/// Sleep `delay` unless cancelled first; false means stop
async fn wait_before_reconnect(
    ctx: &SupervisorContext,
    token: &CancellationToken,
    delay: Duration,
) -> bool {
    debug!(topic = %ctx.topic, delay_ms = delay.as_millis() as u64, "🔄 Reconnect scheduled");
    ctx.metrics.record_reconnect_scheduled();
    ctx.observer.on_reconnect_scheduled(&ctx.topic, delay);

    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
