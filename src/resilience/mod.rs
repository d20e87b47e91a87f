//! # Resilience Module
//!
//! Retry primitives shared by the publish and subscribe paths.
//!
//! ## Architecture
//!
//! - **Backoff**: stateful exponential backoff, one instance per retry sequence
//! - **Retry**: cancellable retry loop with observer notifications for each retry
//!   and for recovery after failures
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use pubsub_resilience::resilience::{
//!     retry_notify_recover, AttemptError, BackoffConfig, ExponentialBackoff, LoggingRetryNotify,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let token = CancellationToken::new();
//! let mut backoff = ExponentialBackoff::new(BackoffConfig::publish(Duration::from_millis(500), 5));
//!
//! let result = retry_notify_recover(
//!     &token,
//!     &mut backoff,
//!     || async { Ok::<_, AttemptError<String>>("sent") },
//!     &LoggingRetryNotify::new("publish"),
//! )
//! .await;
//! # let _ = result;
//! # }
//! ```

pub mod backoff;
pub mod retry;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use retry::{retry_notify_recover, AttemptError, LoggingRetryNotify, RetryError, RetryNotify};
