#![allow(dead_code)]

pub mod handlers;
pub mod observers;
pub mod strategies;

pub use handlers::*;
pub use observers::*;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pubsub_resilience::{InMemoryBroker, PubSubConfig, TopicPubSub};

pub const CONSUMER_ID: &str = "billing";

/// Short intervals so paused-clock tests move quickly
pub fn test_config() -> PubSubConfig {
    PubSubConfig {
        consumer_id: CONSUMER_ID.to_string(),
        timeout_in_sec: 5,
        handler_timeout_in_sec: 30,
        lock_renewal_in_sec: 1,
        max_active_messages: 1,
        min_connection_recovery_in_sec: 1,
        max_connection_recovery_in_sec: 8,
        publish_max_retries: 3,
        publish_initial_retry_interval_in_ms: 10,
        disable_entity_management: false,
    }
}

pub fn pubsub_with(broker: &InMemoryBroker, config: PubSubConfig) -> TopicPubSub {
    TopicPubSub::new(config, Arc::new(broker.clone())).expect("valid test config")
}

pub fn pubsub_observed(
    broker: &InMemoryBroker,
    observer: &Arc<RecordingObserver>,
) -> TopicPubSub {
    pubsub_with(broker, test_config()).with_observer(Arc::clone(observer) as _)
}

/// Poll `condition` until it holds; panics after `limit`
pub async fn wait_until<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not met within {limit:?}");
}

/// Await `future` with a bound, panicking on timeout
pub async fn within<T>(limit: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(limit, future)
        .await
        .unwrap_or_else(|_| panic!("future did not complete within {limit:?}"))
}
