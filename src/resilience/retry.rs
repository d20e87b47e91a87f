//! # Retry With Notify And Recover
//!
//! Drives a fallible async operation through an [`ExponentialBackoff`] until it
//! succeeds, fails permanently, exhausts the backoff, or the governing
//! [`CancellationToken`] is cancelled.
//!
//! Observers implement [`RetryNotify`] instead of passing closures: `on_retry` is
//! called before every wait, and `on_recovered` fires exactly once when an
//! operation succeeds after at least one failure.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::backoff::ExponentialBackoff;
use crate::messaging::ErrorClass;

/// Failure of a single attempt, tagged with how it should be handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError<E> {
    /// Transport failure; retried
    Network(E),
    /// Transient broker condition; retried
    Protocol(E),
    /// Never retried
    Permanent(E),
}

impl<E> AttemptError<E> {
    pub fn from_class(class: ErrorClass, error: E) -> Self {
        match class {
            ErrorClass::Network => AttemptError::Network(error),
            ErrorClass::RetriableProtocol => AttemptError::Protocol(error),
            ErrorClass::Permanent => AttemptError::Permanent(error),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            AttemptError::Network(_) => ErrorClass::Network,
            AttemptError::Protocol(_) => ErrorClass::RetriableProtocol,
            AttemptError::Permanent(_) => ErrorClass::Permanent,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            AttemptError::Network(e) | AttemptError::Protocol(e) | AttemptError::Permanent(e) => e,
        }
    }
}

/// Terminal outcome of a failed retry sequence
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("permanent failure: {0}")]
    Permanent(E),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("retry sequence cancelled")]
    Cancelled,
}

/// Observer for retry progress
pub trait RetryNotify<E>: Send + Sync {
    /// A retriable failure occurred; the next attempt starts after `wait`
    fn on_retry(&self, error: &E, wait: Duration);

    /// The operation succeeded after at least one failure
    fn on_recovered(&self) {}
}

/// Observer that only logs
#[derive(Debug, Clone, Default)]
pub struct LoggingRetryNotify {
    operation: String,
}

impl LoggingRetryNotify {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

impl<E: std::fmt::Display> RetryNotify<E> for LoggingRetryNotify {
    fn on_retry(&self, error: &E, wait: Duration) {
        warn!(
            operation = %self.operation,
            error = %error,
            wait_ms = wait.as_millis() as u64,
            "🔄 Retrying after failure"
        );
    }

    fn on_recovered(&self) {
        debug!(operation = %self.operation, "✅ Recovered after retries");
    }
}

/// Run `attempt` until it succeeds, fails permanently, the backoff stops, or
/// `token` is cancelled.
///
/// Cancellation is checked before each attempt and during each wait; an attempt
/// already in flight runs to completion and bounds itself with its own timeout.
pub async fn retry_notify_recover<T, E, F, Fut, N>(
    token: &CancellationToken,
    backoff: &mut ExponentialBackoff,
    mut attempt: F,
    notify: &N,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
    N: RetryNotify<E> + ?Sized,
{
    let mut attempts: u32 = 0;

    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        attempts += 1;
        let error = match attempt().await {
            Ok(value) => {
                if attempts > 1 {
                    notify.on_recovered();
                }
                return Ok(value);
            }
            Err(AttemptError::Permanent(e)) => return Err(RetryError::Permanent(e)),
            Err(AttemptError::Network(e) | AttemptError::Protocol(e)) => e,
        };

        let Some(wait) = backoff.next() else {
            return Err(RetryError::Exhausted {
                attempts,
                last: error,
            });
        };

        notify.on_retry(&error, wait);

        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::BackoffConfig;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Recorder {
        waits: Mutex<Vec<Duration>>,
        recovered: AtomicU32,
    }

    impl RetryNotify<String> for Recorder {
        fn on_retry(&self, _error: &String, wait: Duration) {
            self.waits.lock().push(wait);
        }

        fn on_recovered(&self) {
            self.recovered.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_backoff(max_retries: u32) -> ExponentialBackoff {
        ExponentialBackoff::new(BackoffConfig::publish(Duration::from_millis(1), max_retries))
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let recorder = Recorder::default();

        let result: Result<(), _> = retry_notify_recover(
            &token,
            &mut fast_backoff(5),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::Permanent("bad request".to_string()))
            },
            &recorder,
        )
        .await;

        assert!(matches!(result, Err(RetryError::Permanent(ref e)) if e == "bad request"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(recorder.waits.lock().is_empty());
    }

    #[tokio::test]
    async fn test_eventual_success_notifies_once() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let recorder = Recorder::default();

        let result = retry_notify_recover(
            &token,
            &mut fast_backoff(5),
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err(AttemptError::Network("reset".to_string()))
                } else {
                    Ok(n)
                }
            },
            &recorder,
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(recorder.waits.lock().len(), 3);
        assert_eq!(recorder.recovered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_try_success_does_not_notify_recovery() {
        let token = CancellationToken::new();
        let recorder = Recorder::default();

        let result = retry_notify_recover(
            &token,
            &mut fast_backoff(5),
            || async { Ok::<_, AttemptError<String>>(7) },
            &recorder,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(recorder.recovered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhausted_reports_last_error() {
        let token = CancellationToken::new();
        let recorder = Recorder::default();

        let result: Result<(), _> = retry_notify_recover(
            &token,
            &mut fast_backoff(2),
            || async { Err(AttemptError::Protocol("busy".to_string())) },
            &recorder,
        )
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "busy");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let token = CancellationToken::new();
        let recorder = Recorder::default();
        let mut backoff = ExponentialBackoff::new(BackoffConfig::reconnect(
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        ));

        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });

        let result: Result<(), _> = retry_notify_recover(
            &token,
            &mut backoff,
            || async { Err(AttemptError::Network("down".to_string())) },
            &recorder,
        )
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(recorder.waits.lock().len(), 1);
    }

    #[test]
    fn test_attempt_error_classes() {
        let err = AttemptError::from_class(ErrorClass::RetriableProtocol, "x");
        assert_eq!(err.class(), ErrorClass::RetriableProtocol);
        assert_eq!(err.into_inner(), "x");
    }
}
