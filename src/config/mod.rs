//! # Pub/Sub Configuration
//!
//! Component-level settings shared by every publish and subscription on a
//! [`TopicPubSub`](crate::TopicPubSub). Per-subscription options (sessions, bulk
//! sizes) come from request metadata instead; see
//! [`SubscribeOptions`](crate::subscription::SubscribeOptions).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pubsub_resilience::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Optional file plus PUBSUB__* environment overrides
//! let config = ConfigLoader::new().with_file("config/pubsub.toml").load()?;
//! println!("consumer: {}", config.consumer_id);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::defaults;
use crate::resilience::BackoffConfig;

/// Component configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Subscription name used on the broker for every subscribed topic
    pub consumer_id: String,
    /// Per-call timeout for broker operations (send, renew, close)
    pub timeout_in_sec: u64,
    /// Upper bound on a single handler invocation
    pub handler_timeout_in_sec: u64,
    /// Lock renewal period; zero disables renewal
    pub lock_renewal_in_sec: u64,
    /// Messages fetched per receive call in single-message mode
    pub max_active_messages: usize,
    pub min_connection_recovery_in_sec: u64,
    pub max_connection_recovery_in_sec: u64,
    pub publish_max_retries: u32,
    pub publish_initial_retry_interval_in_ms: u64,
    /// Skip topic/subscription provisioning
    pub disable_entity_management: bool,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            consumer_id: String::new(),
            timeout_in_sec: defaults::TIMEOUT_IN_SEC,
            handler_timeout_in_sec: defaults::HANDLER_TIMEOUT_IN_SEC,
            lock_renewal_in_sec: defaults::LOCK_RENEWAL_IN_SEC,
            max_active_messages: defaults::MAX_ACTIVE_MESSAGES,
            min_connection_recovery_in_sec: defaults::MIN_CONNECTION_RECOVERY_IN_SEC,
            max_connection_recovery_in_sec: defaults::MAX_CONNECTION_RECOVERY_IN_SEC,
            publish_max_retries: defaults::PUBLISH_MAX_RETRIES,
            publish_initial_retry_interval_in_ms: defaults::PUBLISH_INITIAL_RETRY_INTERVAL_IN_MS,
            disable_entity_management: false,
        }
    }
}

impl PubSubConfig {
    pub fn new(consumer_id: impl Into<String>) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            ..Self::default()
        }
    }

    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.consumer_id.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "consumer_id",
                "pubsub configuration",
            ));
        }

        if self.timeout_in_sec == 0 {
            return Err(ConfigurationError::invalid_value(
                "timeout_in_sec",
                "0",
                "timeout must be greater than 0",
            ));
        }

        if self.handler_timeout_in_sec == 0 {
            return Err(ConfigurationError::invalid_value(
                "handler_timeout_in_sec",
                "0",
                "handler timeout must be greater than 0",
            ));
        }

        if self.max_active_messages == 0 {
            return Err(ConfigurationError::invalid_value(
                "max_active_messages",
                "0",
                "must fetch at least one message per receive",
            ));
        }

        if self.min_connection_recovery_in_sec == 0 {
            return Err(ConfigurationError::invalid_value(
                "min_connection_recovery_in_sec",
                "0",
                "reconnect backoff must start above 0",
            ));
        }

        if self.publish_initial_retry_interval_in_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "publish_initial_retry_interval_in_ms",
                "0",
                "publish backoff must start above 0",
            ));
        }

        if self.min_connection_recovery_in_sec > self.max_connection_recovery_in_sec {
            return Err(ConfigurationError::invalid_value(
                "min_connection_recovery_in_sec",
                self.min_connection_recovery_in_sec.to_string(),
                format!(
                    "must not exceed max_connection_recovery_in_sec ({})",
                    self.max_connection_recovery_in_sec
                ),
            ));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_in_sec)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_in_sec)
    }

    pub fn lock_renewal_interval(&self) -> Duration {
        Duration::from_secs(self.lock_renewal_in_sec)
    }

    /// Backoff for one publish call
    pub fn publish_backoff(&self) -> BackoffConfig {
        BackoffConfig::publish(
            Duration::from_millis(self.publish_initial_retry_interval_in_ms),
            self.publish_max_retries,
        )
    }

    /// Backoff for subscription reconnects and session slot recovery
    pub fn reconnect_backoff(&self) -> BackoffConfig {
        BackoffConfig::reconnect(
            Duration::from_secs(self.min_connection_recovery_in_sec),
            Duration::from_secs(self.max_connection_recovery_in_sec),
        )
    }
}
