//! # Lock Renewal Loop
//!
//! Keeps peek-locks alive while messages are being handled.
//!
//! Every `interval` the loop renews either the session lock (session receivers)
//! or the lock of every message the connection currently holds. Each renewal
//! call is bounded by `timeout`.
//!
//! ### Failure semantics
//! - A failed message-lock renewal only affects that message: it is logged and
//!   dropped from tracking, and the loop carries on.
//! - A receiver-fatal error (`ReceiverClosed`, `SessionLockLost`) ends the loop
//!   with that error; the caller marks the connection lost.
//! - Cancelling `token` ends the loop with `Ok(())`, including mid-renewal.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::receiver_loop::ConnectionState;
use crate::messaging::{MessagingError, Receiver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRenewalOptions {
    /// Tick period; zero disables renewal
    pub interval: Duration,
    /// Bound on each renewal call
    pub timeout: Duration,
}

/// Renew locks until `token` is cancelled or a receiver-fatal error occurs
pub async fn renew_locks_blocking(
    token: &CancellationToken,
    receiver: &Arc<dyn Receiver>,
    state: &ConnectionState,
    options: LockRenewalOptions,
) -> Result<(), MessagingError> {
    if options.interval.is_zero() {
        debug!("Lock renewal disabled");
        return Ok(());
    }

    let mut ticker = interval_at(Instant::now() + options.interval, options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let renewal = async {
            if receiver.session_id().is_some() {
                renew_session(receiver, options.timeout).await
            } else {
                renew_messages(receiver, state, options.timeout).await
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            result = renewal => result?,
        }
    }
}

async fn renew_session(
    receiver: &Arc<dyn Receiver>,
    timeout: Duration,
) -> Result<(), MessagingError> {
    let session_id = receiver.session_id().unwrap_or_default();

    match tokio::time::timeout(timeout, receiver.renew_session_lock()).await {
        Ok(Ok(())) => {
            debug!(session_id = %session_id, "🔒 Renewed session lock");
            Ok(())
        }
        Ok(Err(e)) if e.is_receiver_fatal() => Err(e),
        Ok(Err(e)) => {
            warn!(session_id = %session_id, error = %e, "Failed to renew session lock");
            Ok(())
        }
        Err(_) => {
            warn!(
                session_id = %session_id,
                timeout_ms = timeout.as_millis() as u64,
                "Session lock renewal timed out"
            );
            Ok(())
        }
    }
}

async fn renew_messages(
    receiver: &Arc<dyn Receiver>,
    state: &ConnectionState,
    timeout: Duration,
) -> Result<(), MessagingError> {
    let held = state.tracked();
    if held.is_empty() {
        return Ok(());
    }

    let results = join_all(held.iter().map(|message| async move {
        let result = tokio::time::timeout(timeout, receiver.renew_message_lock(message))
            .await
            .unwrap_or_else(|_| {
                Err(MessagingError::timeout(
                    "renew_message_lock",
                    timeout.as_secs(),
                ))
            });
        (message, result)
    }))
    .await;

    let mut renewed = 0usize;
    for (message, result) in results {
        match result {
            Ok(()) => renewed += 1,
            Err(e) if e.is_receiver_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "Failed to renew message lock, no longer tracking it"
                );
                state.untrack(&message.lock_token);
            }
        }
    }

    debug!(renewed = renewed, held = held.len(), "🔒 Renewed message locks");
    Ok(())
}
