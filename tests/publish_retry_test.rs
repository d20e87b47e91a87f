//! Publish retry and bulk publish behavior against the in-memory broker

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use pubsub_resilience::messaging::BulkPublishStatus;
use pubsub_resilience::{
    BulkPublishEntry, BulkPublishRequest, InMemoryBroker, MessagingError, PubSubError,
    PublishRequest,
};
use tokio_test::{assert_err, assert_ok};

fn bulk_request(topic: &str, ids: &[&str]) -> BulkPublishRequest {
    BulkPublishRequest {
        topic: topic.to_string(),
        entries: ids
            .iter()
            .map(|id| BulkPublishEntry::new(*id, format!("event-{id}").into_bytes()))
            .collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_empty_bulk_publish_makes_no_broker_calls() {
    let broker = InMemoryBroker::new();
    let pubsub = pubsub_with(&broker, test_config());

    let response = assert_ok!(pubsub.bulk_publish(&bulk_request("orders", &[])).await);

    assert!(response.statuses.is_empty());
    let stats = broker.stats();
    assert_eq!(stats.senders_created, 0);
    assert_eq!(stats.send_calls, 0);
    assert!(!broker.topic_exists("orders"));
}

#[tokio::test]
async fn test_network_failure_replaces_sender_and_retries() {
    let broker = InMemoryBroker::new();
    broker.create_subscription("orders", CONSUMER_ID, false);
    broker.fail_next_sends([MessagingError::connection("link detached")]);
    let pubsub = pubsub_with(&broker, test_config());

    assert_ok!(
        pubsub
            .publish(&PublishRequest::new("orders", b"payload".to_vec()))
            .await
    );

    let stats = broker.stats();
    assert_eq!(stats.send_calls, 2);
    assert_eq!(stats.senders_created, 2);
    assert_eq!(stats.senders_closed, 1);
    assert_eq!(broker.pending_messages("orders", CONSUMER_ID), 1);
    assert!(pubsub.sender_registry().has_sender("orders").await);
}

#[tokio::test]
async fn test_protocol_failure_retries_on_same_sender() {
    let broker = InMemoryBroker::new();
    broker.create_subscription("orders", CONSUMER_ID, false);
    broker.fail_next_sends([
        MessagingError::throttled("slow down"),
        MessagingError::server_busy("busy"),
    ]);
    let pubsub = pubsub_with(&broker, test_config());

    assert_ok!(
        pubsub
            .publish(&PublishRequest::new("orders", b"payload".to_vec()))
            .await
    );

    let stats = broker.stats();
    assert_eq!(stats.send_calls, 3);
    assert_eq!(stats.senders_created, 1);
    assert_eq!(stats.senders_closed, 0);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let broker = InMemoryBroker::new();
    broker.fail_next_sends([MessagingError::authorization("orders", "missing send claim")]);
    let pubsub = pubsub_with(&broker, test_config());

    let err = assert_err!(
        pubsub
            .publish(&PublishRequest::new("orders", b"payload".to_vec()))
            .await
    );

    assert!(matches!(
        err,
        PubSubError::Publish {
            source: MessagingError::Authorization { .. },
            ..
        }
    ));
    assert_eq!(broker.stats().send_calls, 1);
}

#[tokio::test]
async fn test_retries_stop_after_configured_budget() {
    let broker = InMemoryBroker::new();
    broker.fail_next_sends((0..10).map(|_| MessagingError::throttled("slow down")));
    let pubsub = pubsub_with(&broker, test_config());

    let err = assert_err!(
        pubsub
            .publish(&PublishRequest::new("orders", b"payload".to_vec()))
            .await
    );

    match err {
        PubSubError::RetriesExhausted {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 4);
            assert!(matches!(source, MessagingError::Throttled { .. }));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    assert_eq!(broker.stats().send_calls, 4);
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_publish_backoff() {
    let broker = InMemoryBroker::new();
    broker.fail_next_sends((0..10).map(|_| MessagingError::server_busy("busy")));
    let mut config = test_config();
    config.publish_initial_retry_interval_in_ms = 60_000;
    let pubsub = Arc::new(pubsub_with(&broker, config));

    let publishing = {
        let pubsub = Arc::clone(&pubsub);
        tokio::spawn(async move {
            pubsub
                .publish(&PublishRequest::new("orders", b"payload".to_vec()))
                .await
        })
    };

    wait_until(Duration::from_secs(1), || broker.stats().send_calls == 1).await;
    assert_ok!(pubsub.close().await);

    let result = within(Duration::from_secs(1), publishing).await;
    assert!(matches!(result, Ok(Err(PubSubError::Cancelled))));
    assert_eq!(broker.stats().send_calls, 1);
}

#[tokio::test]
async fn test_publish_after_close_is_rejected() {
    let broker = InMemoryBroker::new();
    let pubsub = pubsub_with(&broker, test_config());
    assert_ok!(pubsub.close().await);

    let err = assert_err!(
        pubsub
            .publish(&PublishRequest::new("orders", b"payload".to_vec()))
            .await
    );
    assert!(matches!(err, PubSubError::Closed));
}

#[tokio::test]
async fn test_bulk_publish_succeeds_in_one_call() {
    let broker = InMemoryBroker::new();
    broker.create_subscription("orders", CONSUMER_ID, false);
    let pubsub = pubsub_with(&broker, test_config());

    let response = assert_ok!(
        pubsub
            .bulk_publish(&bulk_request("orders", &["a", "b", "c"]))
            .await
    );

    assert_eq!(response.statuses.len(), 3);
    assert!(response
        .statuses
        .iter()
        .all(|s| s.status == BulkPublishStatus::Succeeded && s.error.is_none()));
    assert_eq!(broker.stats().send_calls, 1);
    assert_eq!(broker.pending_messages("orders", CONSUMER_ID), 3);
}

#[tokio::test]
async fn test_bulk_network_failure_fails_every_entry_without_retry() {
    let broker = InMemoryBroker::new();
    broker.create_subscription("orders", CONSUMER_ID, false);
    broker.fail_next_sends([MessagingError::connection("link detached")]);
    let pubsub = pubsub_with(&broker, test_config());

    let err = assert_err!(
        pubsub
            .bulk_publish(&bulk_request("orders", &["a", "b"]))
            .await
    );

    match err {
        PubSubError::BulkPublish { failed_entries, .. } => {
            assert_eq!(failed_entries, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected bulk publish failure, got {other:?}"),
    }
    let stats = broker.stats();
    assert_eq!(stats.send_calls, 1);
    assert_eq!(stats.senders_closed, 1);
    assert_eq!(broker.pending_messages("orders", CONSUMER_ID), 0);
    assert!(!pubsub.sender_registry().has_sender("orders").await);
}

#[tokio::test]
async fn test_entity_management_disabled_skips_provisioning() {
    let broker = InMemoryBroker::without_entity_management();
    broker.create_subscription("orders", CONSUMER_ID, false);
    let mut config = test_config();
    config.disable_entity_management = true;
    let pubsub = pubsub_with(&broker, config);

    assert_ok!(
        pubsub
            .publish(&PublishRequest::new("orders", b"payload".to_vec()))
            .await
    );
    assert_eq!(broker.pending_messages("orders", CONSUMER_ID), 1);
    assert!(!broker.topic_exists("invoices"));
}

#[tokio::test]
async fn test_publish_to_empty_topic_is_configuration_error() {
    let broker = InMemoryBroker::new();
    let pubsub = pubsub_with(&broker, test_config());

    let err = assert_err!(pubsub.publish(&PublishRequest::new("", b"x".to_vec())).await);
    assert!(matches!(err, PubSubError::Configuration(_)));
}
