//! # System Constants
//!
//! Metadata keys, defaults and feature flags that define the operational
//! boundaries of the pub/sub engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metadata keys recognized on subscribe and publish requests
pub mod metadata_keys {
    // Subscribe request options
    pub const REQUIRE_SESSIONS: &str = "requireSessions";
    pub const SESSION_IDLE_TIMEOUT: &str = "sessionIdleTimeout";
    pub const MAX_CONCURRENT_SESSIONS: &str = "maxConcurrentSessions";
    pub const MAX_BULK_SUB_COUNT: &str = "maxBulkSubCount";

    // Bulk publish request options
    pub const MAX_BULK_PUB_BYTES: &str = "maxBulkPubBytes";

    // Message envelope fields
    pub const MESSAGE_ID: &str = "MessageId";
    pub const SESSION_ID: &str = "SessionId";
    pub const CORRELATION_ID: &str = "CorrelationId";
    pub const TTL_IN_SECONDS: &str = "ttlInSeconds";
    pub const DELIVERY_COUNT: &str = "DeliveryCount";
    pub const ENQUEUED_TIME_UTC: &str = "EnqueuedTimeUtc";
}

/// Default values applied when options are absent
pub mod defaults {
    pub const MAX_BULK_SUB_COUNT: usize = 100;
    pub const MAX_BULK_PUB_BYTES: u64 = 1024 * 128;
    pub const SESSION_IDLE_TIMEOUT_IN_SEC: u64 = 60;
    pub const MAX_CONCURRENT_SESSIONS: usize = 8;

    pub const TIMEOUT_IN_SEC: u64 = 60;
    pub const HANDLER_TIMEOUT_IN_SEC: u64 = 60;
    pub const LOCK_RENEWAL_IN_SEC: u64 = 20;
    pub const MAX_ACTIVE_MESSAGES: usize = 1;
    pub const MIN_CONNECTION_RECOVERY_IN_SEC: u64 = 2;
    pub const MAX_CONNECTION_RECOVERY_IN_SEC: u64 = 300;
    pub const PUBLISH_MAX_RETRIES: u32 = 5;
    pub const PUBLISH_INITIAL_RETRY_INTERVAL_IN_MS: u64 = 500;
}

/// Exponential backoff tuning shared by publish and reconnect sequences
pub mod backoff {
    use super::Duration;

    pub const MULTIPLIER: f64 = 1.5;
    pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);
    pub const DEFAULT_MAX_ELAPSED_TIME: Duration = Duration::from_secs(15 * 60);
}

/// Values accepted as "true" for boolean metadata
pub const TRUTHY_VALUES: &[&str] = &["1", "t", "true", "y", "yes", "on"];

/// Optional capabilities advertised by the pub/sub component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Feature {
    /// Per-message time-to-live via the `ttlInSeconds` metadata key
    MessageTtl,
}

/// Check a metadata value against [`TRUTHY_VALUES`], ignoring case and whitespace
pub fn is_truthy(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    TRUTHY_VALUES.contains(&value.as_str())
}
