//! Per-request option parsing for subscribe and bulk publish.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{defaults, is_truthy, metadata_keys};
use crate::error::PubSubError;
use crate::messaging::SubscriptionEntityOptions;

/// Whether a subscription delivers one message at a time or batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveMode {
    Single,
    Bulk,
}

/// Options derived from subscribe request metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub mode: ReceiveMode,
    pub require_sessions: bool,
    pub session_idle_timeout: Duration,
    pub max_concurrent_sessions: usize,
    pub max_bulk_sub_count: usize,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            mode: ReceiveMode::Single,
            require_sessions: false,
            session_idle_timeout: Duration::from_secs(defaults::SESSION_IDLE_TIMEOUT_IN_SEC),
            max_concurrent_sessions: defaults::MAX_CONCURRENT_SESSIONS,
            max_bulk_sub_count: defaults::MAX_BULK_SUB_COUNT,
        }
    }
}

impl SubscribeOptions {
    /// Parse subscribe metadata; malformed values are configuration errors
    pub fn from_metadata(
        metadata: &HashMap<String, String>,
        mode: ReceiveMode,
    ) -> Result<Self, PubSubError> {
        let mut options = Self {
            mode,
            ..Self::default()
        };

        if let Some(value) = metadata.get(metadata_keys::REQUIRE_SESSIONS) {
            options.require_sessions = is_truthy(value);
        }

        if let Some(seconds) = parse_key::<u64>(metadata, metadata_keys::SESSION_IDLE_TIMEOUT)? {
            if seconds == 0 {
                return Err(invalid(metadata_keys::SESSION_IDLE_TIMEOUT, "0"));
            }
            options.session_idle_timeout = Duration::from_secs(seconds);
        }

        if let Some(count) = parse_key::<usize>(metadata, metadata_keys::MAX_CONCURRENT_SESSIONS)? {
            if count == 0 {
                return Err(invalid(metadata_keys::MAX_CONCURRENT_SESSIONS, "0"));
            }
            options.max_concurrent_sessions = count;
        }

        if mode == ReceiveMode::Bulk {
            if let Some(count) = parse_key::<usize>(metadata, metadata_keys::MAX_BULK_SUB_COUNT)? {
                if count == 0 {
                    return Err(invalid(metadata_keys::MAX_BULK_SUB_COUNT, "0"));
                }
                options.max_bulk_sub_count = count;
            }
        }

        Ok(options)
    }

    /// Messages requested per receive call
    pub fn fetch_size(&self, max_active_messages: usize) -> usize {
        match self.mode {
            ReceiveMode::Single => max_active_messages.max(1),
            ReceiveMode::Bulk => self.max_bulk_sub_count,
        }
    }

    /// Idle bound for a session fetch; `None` for non-session subscriptions
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.require_sessions.then_some(self.session_idle_timeout)
    }

    pub fn entity_options(&self) -> SubscriptionEntityOptions {
        SubscriptionEntityOptions {
            require_sessions: self.require_sessions,
            max_concurrent_sessions: self.max_concurrent_sessions,
        }
    }
}

/// Batch byte limit for a bulk publish request
pub fn max_bulk_pub_bytes(metadata: &HashMap<String, String>) -> Result<u64, PubSubError> {
    match parse_key::<u64>(metadata, metadata_keys::MAX_BULK_PUB_BYTES)? {
        Some(0) => Err(invalid(metadata_keys::MAX_BULK_PUB_BYTES, "0")),
        Some(bytes) => Ok(bytes),
        None => Ok(defaults::MAX_BULK_PUB_BYTES),
    }
}

fn parse_key<T: FromStr>(
    metadata: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, PubSubError> {
    metadata
        .get(key)
        .map(|value| value.trim().parse::<T>().map_err(|_| invalid(key, value)))
        .transpose()
}

fn invalid(key: &str, value: &str) -> PubSubError {
    PubSubError::configuration(format!("invalid value '{value}' for metadata key {key}"))
}
