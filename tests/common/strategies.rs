use std::time::Duration;

use proptest::prelude::*;

use pubsub_resilience::BackoffConfig;

/// Strategy for valid backoff configurations with a retry bound
pub fn backoff_config_strategy() -> impl Strategy<Value = BackoffConfig> {
    (1u64..5_000, 1u64..120_000, 1.0f64..4.0, 1u32..40).prop_map(
        |(initial_ms, max_ms, multiplier, max_retries)| BackoffConfig {
            initial_interval: Duration::from_millis(initial_ms),
            max_interval: Duration::from_millis(max_ms),
            multiplier,
            max_elapsed_time: None,
            max_retries: Some(max_retries),
        },
    )
}

/// Strategy for reconnect bounds in seconds, `min <= max`
pub fn reconnect_bounds_strategy() -> impl Strategy<Value = (u64, u64)> {
    (1u64..30).prop_flat_map(|min| (Just(min), min..600))
}
