//! Supervised subscriptions: reconnects, settlement and tear-down

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use pubsub_resilience::constants::metadata_keys;
use pubsub_resilience::messaging::BrokerMessage;
use pubsub_resilience::{
    InMemoryBroker, MessagingError, PubSubError, SubscribeRequest, TopicPubSub,
};
use tokio_test::{assert_err, assert_ok};

const LIMIT: Duration = Duration::from_secs(60);

fn message(body: &[u8]) -> BrokerMessage {
    BrokerMessage {
        body: body.to_vec(),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_with_growing_delay_until_connected() {
    let broker = InMemoryBroker::new();
    broker.create_subscription("orders", CONSUMER_ID, false);
    broker.fail_next_connects([
        MessagingError::connection("connection refused"),
        MessagingError::connection("connection refused"),
    ]);
    assert_ok!(broker.send_to_topic("orders", message(b"first")));

    let observer = Arc::new(RecordingObserver::default());
    let pubsub = pubsub_observed(&broker, &observer);
    let handler = Arc::new(CollectingHandler::default());
    let handle = assert_ok!(
        pubsub
            .subscribe(SubscribeRequest::new("orders"), handler.clone())
            .await
    );

    wait_until(LIMIT, || handler.count() == 1).await;
    assert_ok!(broker.send_to_topic("orders", message(b"second")));
    wait_until(LIMIT, || handler.count() == 2).await;

    assert_eq!(
        observer.delays(),
        vec![Duration::from_secs(1), Duration::from_millis(1500)]
    );
    assert_eq!(observer.connection_losses(), 2);
    assert_eq!(observer.connected(), 1);
    assert_eq!(observer.first_successes(), 1);
    assert_eq!(broker.stats().connect_attempts, 3);
    assert_eq!(handler.bodies(), vec![b"first".to_vec(), b"second".to_vec()]);

    handle.cancel();
    within(LIMIT, handle.stopped()).await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_releases_receiver_and_renewal() {
    let broker = InMemoryBroker::new();
    let observer = Arc::new(RecordingObserver::default());
    let pubsub = pubsub_observed(&broker, &observer);
    let handler = Arc::new(CollectingHandler::default());

    let handle = assert_ok!(
        pubsub
            .subscribe(SubscribeRequest::new("orders"), handler.clone())
            .await
    );
    assert_ok!(broker.send_to_topic("orders", message(b"hello")));
    wait_until(LIMIT, || handler.count() == 1).await;

    let live = handle.metrics();
    assert_eq!(live.active_receivers, 1);
    assert_eq!(live.active_renewal_loops, 1);

    handle.cancel();
    within(LIMIT, handle.stopped()).await;

    let metrics = handle.metrics();
    assert_eq!(metrics.active_receivers, 0);
    assert_eq!(metrics.active_renewal_loops, 0);
    assert_eq!(metrics.messages_completed, 1);
    assert_eq!(broker.stats().open_receivers, 0);
    assert_eq!(observer.receivers_closed(), 1);
    assert_eq!(observer.stopped(), 1);
    assert!(observer.delays().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_handler_skips_settlement() {
    let broker = InMemoryBroker::new();
    let pubsub = pubsub_with(&broker, test_config());
    let handler = Arc::new(GatedHandler::default());

    let handle = assert_ok!(
        pubsub
            .subscribe(SubscribeRequest::new("orders"), handler.clone())
            .await
    );
    assert_ok!(broker.send_to_topic("orders", message(b"slow")));
    wait_until(LIMIT, || handler.entered() == 1).await;

    handle.cancel();
    within(LIMIT, handle.stopped()).await;

    let stats = broker.stats();
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.abandoned, 0);
    assert_eq!(handler.finished(), 0);
    // Closing the receiver released the lock for redelivery
    assert_eq!(broker.pending_messages("orders", CONSUMER_ID), 1);

    let redelivered = Arc::new(CollectingHandler::default());
    let second = assert_ok!(
        pubsub
            .subscribe(SubscribeRequest::new("orders"), redelivered.clone())
            .await
    );
    wait_until(LIMIT, || redelivered.count() == 1).await;
    second.cancel();
    within(LIMIT, second.stopped()).await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_handler_abandons_for_redelivery() {
    let broker = InMemoryBroker::new();
    let pubsub = pubsub_with(&broker, test_config());
    let handler = Arc::new(FlakyHandler::new(1));

    let handle = assert_ok!(
        pubsub
            .subscribe(SubscribeRequest::new("orders"), handler.clone())
            .await
    );
    assert_ok!(broker.send_to_topic("orders", message(b"retry-me")));
    wait_until(LIMIT, || handler.succeeded().len() == 1).await;

    let delivered = &handler.succeeded()[0];
    assert_eq!(
        delivered.metadata.get(metadata_keys::DELIVERY_COUNT).map(String::as_str),
        Some("2")
    );
    let stats = broker.stats();
    assert_eq!(stats.abandoned, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(handle.metrics().messages_abandoned, 1);

    handle.cancel();
    within(LIMIT, handle.stopped()).await;
}

#[tokio::test(start_paused = true)]
async fn test_fatal_renewal_failure_reconnects() {
    let broker = InMemoryBroker::new();
    broker.fail_next_renewals([MessagingError::ReceiverClosed]);
    let observer = Arc::new(RecordingObserver::default());
    let pubsub = pubsub_observed(&broker, &observer);
    let handler = Arc::new(GatedHandler::default());

    let handle = assert_ok!(
        pubsub
            .subscribe(SubscribeRequest::new("orders"), handler.clone())
            .await
    );
    assert_ok!(broker.send_to_topic("orders", message(b"held")));
    wait_until(LIMIT, || handler.entered() == 1).await;
    wait_until(LIMIT, || observer.renewal_failures() == 1).await;

    handler.release(1);
    wait_until(LIMIT, || observer.connected() == 2).await;

    assert_eq!(observer.connection_losses(), 1);
    // The lost connection had delivered a message, so backoff restarted
    assert_eq!(observer.delays(), vec![Duration::from_secs(1)]);
    assert_eq!(handler.finished(), 1);
    assert_eq!(broker.stats().completed, 1);

    handle.cancel();
    within(LIMIT, handle.stopped()).await;
    assert_eq!(broker.stats().open_receivers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_subscribe_abandons_only_failed_entries() {
    let broker = InMemoryBroker::new();
    broker.create_subscription("orders", CONSUMER_ID, false);
    for body in [&b"ok-1"[..], b"bad", b"ok-2"] {
        assert_ok!(broker.send_to_topic("orders", message(body)));
    }

    let pubsub = pubsub_with(&broker, test_config());
    let handler = Arc::new(SelectiveBulkHandler::rejecting_once(b"bad"));
    let request =
        SubscribeRequest::new("orders").with_metadata(metadata_keys::MAX_BULK_SUB_COUNT, "10");

    let handle = assert_ok!(pubsub.bulk_subscribe(request, handler.clone()).await);
    wait_until(LIMIT, || handler.entries_seen() == 4).await;

    let batches = handler.batches();
    assert_eq!(batches[0].entries.len(), 3);
    assert_eq!(batches[1].entries.len(), 1);
    assert_eq!(batches[1].entries[0].event, b"bad".to_vec());

    wait_until(LIMIT, || broker.stats().completed == 3).await;
    assert_eq!(broker.stats().abandoned, 1);

    handle.cancel();
    within(LIMIT, handle.stopped()).await;
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_every_subscription() {
    let broker = InMemoryBroker::new();
    let observer = Arc::new(RecordingObserver::default());
    let pubsub = pubsub_observed(&broker, &observer);

    let orders = assert_ok!(
        pubsub
            .subscribe(
                SubscribeRequest::new("orders"),
                Arc::new(CollectingHandler::default())
            )
            .await
    );
    let invoices = assert_ok!(
        pubsub
            .subscribe(
                SubscribeRequest::new("invoices"),
                Arc::new(CollectingHandler::default())
            )
            .await
    );
    wait_until(LIMIT, || observer.connected() == 2).await;

    assert_ok!(within(LIMIT, pubsub.close()).await);

    assert!(orders.is_cancelled());
    assert!(invoices.is_cancelled());
    assert_eq!(observer.stopped(), 2);
    assert_eq!(broker.stats().open_receivers, 0);

    let err = assert_err!(
        pubsub
            .subscribe(
                SubscribeRequest::new("orders"),
                Arc::new(CollectingHandler::default())
            )
            .await
    );
    assert!(matches!(err, PubSubError::Closed));
}

#[tokio::test]
async fn test_subscribe_provisions_session_subscription() {
    let broker = InMemoryBroker::new();
    let pubsub = pubsub_with(&broker, test_config());
    let request =
        SubscribeRequest::new("orders").with_metadata(metadata_keys::REQUIRE_SESSIONS, "true");

    let handle = assert_ok!(
        pubsub
            .subscribe(request, Arc::new(CollectingHandler::default()))
            .await
    );

    assert_eq!(
        broker.subscription_requires_sessions("orders", CONSUMER_ID),
        Some(true)
    );
    assert_eq!(
        handle.session_pool().map(|pool| pool.capacity()),
        Some(pubsub_resilience::constants::defaults::MAX_CONCURRENT_SESSIONS)
    );

    assert_ok!(pubsub.close().await);
}

#[tokio::test]
async fn test_invalid_metadata_is_rejected_before_provisioning() {
    let broker = InMemoryBroker::new();
    let pubsub = pubsub_with(&broker, test_config());
    let request = SubscribeRequest::new("orders")
        .with_metadata(metadata_keys::REQUIRE_SESSIONS, "true")
        .with_metadata(metadata_keys::MAX_CONCURRENT_SESSIONS, "0");

    let err = assert_err!(
        pubsub
            .subscribe(request, Arc::new(CollectingHandler::default()))
            .await
    );

    assert!(matches!(err, PubSubError::Configuration(_)));
    assert!(!broker.topic_exists("orders"));
}

#[test]
fn test_zero_recovery_interval_is_rejected() {
    let broker = InMemoryBroker::new();
    let mut config = test_config();
    config.min_connection_recovery_in_sec = 0;

    let err = assert_err!(TopicPubSub::new(config, Arc::new(broker.clone())));

    assert!(matches!(err, PubSubError::Configuration(_)));
    assert_eq!(broker.stats().connect_attempts, 0);
}
