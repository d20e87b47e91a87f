//! # Exponential Backoff
//!
//! Stateful backoff used by every retry sequence in the crate: publish retries,
//! subscription reconnects and per-slot session recovery.
//!
//! Each call to [`ExponentialBackoff::next`] returns the current interval and
//! grows it by a fixed multiplier, clamped to `max_interval`. The sequence stops
//! (`None`) once the optional retry count or elapsed-time budget is exhausted.
//! No jitter is applied, so for a given config the sequence is deterministic.
//!
//! ```rust
//! use std::time::Duration;
//! use pubsub_resilience::resilience::{BackoffConfig, ExponentialBackoff};
//!
//! let mut backoff = ExponentialBackoff::new(BackoffConfig {
//!     initial_interval: Duration::from_millis(100),
//!     max_interval: Duration::from_millis(200),
//!     multiplier: 1.5,
//!     max_elapsed_time: None,
//!     max_retries: Some(3),
//! });
//!
//! assert_eq!(backoff.next(), Some(Duration::from_millis(100)));
//! assert_eq!(backoff.next(), Some(Duration::from_millis(150)));
//! assert_eq!(backoff.next(), Some(Duration::from_millis(200)));
//! assert_eq!(backoff.next(), None);
//!
//! backoff.reset();
//! assert_eq!(backoff.next(), Some(Duration::from_millis(100)));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::constants::backoff;

/// Parameters of an exponential backoff sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Interval returned by the first `next()` after construction or reset
    pub initial_interval: Duration,
    /// Upper bound for any returned interval
    pub max_interval: Duration,
    /// Growth factor; values below 1.0 are treated as 1.0
    pub multiplier: f64,
    /// Stop once this much time has passed since the last reset
    pub max_elapsed_time: Option<Duration>,
    /// Stop after this many intervals have been handed out
    pub max_retries: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: backoff::DEFAULT_INITIAL_INTERVAL,
            max_interval: backoff::DEFAULT_MAX_INTERVAL,
            multiplier: backoff::MULTIPLIER,
            max_elapsed_time: Some(backoff::DEFAULT_MAX_ELAPSED_TIME),
            max_retries: None,
        }
    }
}

impl BackoffConfig {
    /// Bounded sequence for publish retries
    pub fn publish(initial_interval: Duration, max_retries: u32) -> Self {
        Self {
            initial_interval,
            max_retries: Some(max_retries),
            ..Self::default()
        }
    }

    /// Unbounded sequence for reconnects; never returns `None`
    pub fn reconnect(min_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval: min_interval,
            max_interval,
            multiplier: backoff::MULTIPLIER,
            max_elapsed_time: None,
            max_retries: None,
        }
    }
}

/// Stateful exponential backoff. One instance per retry sequence.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_interval: Duration,
    retries: u32,
    started_at: Instant,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_interval: config.initial_interval.min(config.max_interval),
            config,
            retries: 0,
            started_at: Instant::now(),
        }
    }

    /// Next wait interval, or `None` when the sequence is exhausted
    pub fn next(&mut self) -> Option<Duration> {
        if let Some(max_retries) = self.config.max_retries {
            if self.retries >= max_retries {
                return None;
            }
        }
        if let Some(max_elapsed) = self.config.max_elapsed_time {
            if self.started_at.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current_interval;
        self.retries = self.retries.saturating_add(1);
        self.current_interval = self.grow(interval);
        Some(interval)
    }

    /// Restore the initial interval and restart the retry count and elapsed clock
    pub fn reset(&mut self) {
        self.current_interval = self.config.initial_interval.min(self.config.max_interval);
        self.retries = 0;
        self.started_at = Instant::now();
    }

    /// Interval the next `next()` call would return
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    fn grow(&self, interval: Duration) -> Duration {
        let multiplier = self.config.multiplier.max(1.0);
        let grown = interval.as_secs_f64() * multiplier;
        let max = self.config.max_interval;
        if !grown.is_finite() || grown >= max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(grown).max(interval)
        }
    }
}
