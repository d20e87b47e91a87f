use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use pubsub_resilience::{InMemoryBroker, MessagingError, SubscriptionObserver};

/// Counts lifecycle callbacks and records scheduled reconnect delays
#[derive(Debug, Default)]
pub struct RecordingObserver {
    connected: AtomicUsize,
    first_successes: AtomicUsize,
    connection_losses: AtomicUsize,
    receivers_closed: AtomicUsize,
    renewal_failures: AtomicUsize,
    stopped: AtomicUsize,
    delays: Mutex<Vec<Duration>>,
    sessions: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::Acquire)
    }

    pub fn first_successes(&self) -> usize {
        self.first_successes.load(Ordering::Acquire)
    }

    pub fn connection_losses(&self) -> usize {
        self.connection_losses.load(Ordering::Acquire)
    }

    pub fn receivers_closed(&self) -> usize {
        self.receivers_closed.load(Ordering::Acquire)
    }

    pub fn renewal_failures(&self) -> usize {
        self.renewal_failures.load(Ordering::Acquire)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    /// Session ids in the order they were connected
    pub fn sessions(&self) -> Vec<String> {
        self.sessions.lock().clone()
    }
}

impl SubscriptionObserver for RecordingObserver {
    fn on_connected(&self, _topic: &str, session_id: Option<&str>) {
        self.connected.fetch_add(1, Ordering::AcqRel);
        if let Some(session) = session_id {
            self.sessions.lock().push(session.to_string());
        }
    }

    fn on_first_success(&self, _topic: &str, _session_id: Option<&str>) {
        self.first_successes.fetch_add(1, Ordering::AcqRel);
    }

    fn on_connection_lost(&self, _topic: &str, _error: &MessagingError) {
        self.connection_losses.fetch_add(1, Ordering::AcqRel);
    }

    fn on_reconnect_scheduled(&self, _topic: &str, delay: Duration) {
        self.delays.lock().push(delay);
    }

    fn on_receiver_closed(&self, _topic: &str, _session_id: Option<&str>) {
        self.receivers_closed.fetch_add(1, Ordering::AcqRel);
    }

    fn on_lock_renewal_failed(&self, _topic: &str, _error: &MessagingError) {
        self.renewal_failures.fetch_add(1, Ordering::AcqRel);
    }

    fn on_stopped(&self, _topic: &str) {
        self.stopped.fetch_add(1, Ordering::AcqRel);
    }
}

/// Captures how many broker receivers were still open when `on_stopped` fired
#[derive(Debug)]
pub struct StopSnapshotObserver {
    broker: InMemoryBroker,
    open_at_stop: Mutex<Option<usize>>,
}

impl StopSnapshotObserver {
    pub fn new(broker: &InMemoryBroker) -> Self {
        Self {
            broker: broker.clone(),
            open_at_stop: Mutex::new(None),
        }
    }

    pub fn open_at_stop(&self) -> Option<usize> {
        *self.open_at_stop.lock()
    }
}

impl SubscriptionObserver for StopSnapshotObserver {
    fn on_stopped(&self, _topic: &str) {
        *self.open_at_stop.lock() = Some(self.broker.stats().open_receivers);
    }
}
