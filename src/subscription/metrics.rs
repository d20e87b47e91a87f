//! # Subscription Metrics
//!
//! Live counters and gauges for one subscription.
//!
//! ## Features
//!
//! - **Gauges**: open receivers and running lock renewal loops, maintained by
//!   RAII guards so every exit path (including panics) decrements them
//! - **Counters**: connections, reconnects, messages received/completed/abandoned
//! - **Snapshots**: serializable point-in-time view via [`SubscriptionMetrics::snapshot`]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct SubscriptionMetrics {
    active_receivers: AtomicUsize,
    max_active_receivers: AtomicUsize,
    active_renewal_loops: AtomicUsize,
    connections_opened: AtomicU64,
    connection_failures: AtomicU64,
    reconnects_scheduled: AtomicU64,
    messages_received: AtomicU64,
    messages_completed: AtomicU64,
    messages_abandoned: AtomicU64,
}

/// Point-in-time view of [`SubscriptionMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub active_receivers: usize,
    pub max_active_receivers: usize,
    pub active_renewal_loops: usize,
    pub connections_opened: u64,
    pub connection_failures: u64,
    pub reconnects_scheduled: u64,
    pub messages_received: u64,
    pub messages_completed: u64,
    pub messages_abandoned: u64,
}

#[derive(Debug, Clone, Copy)]
enum Gauge {
    Receivers,
    RenewalLoops,
}

/// Decrements its gauge on drop
#[derive(Debug)]
pub struct GaugeGuard {
    metrics: Arc<SubscriptionMetrics>,
    gauge: Gauge,
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.metrics.gauge(self.gauge).fetch_sub(1, Ordering::AcqRel);
    }
}

impl SubscriptionMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn gauge(&self, gauge: Gauge) -> &AtomicUsize {
        match gauge {
            Gauge::Receivers => &self.active_receivers,
            Gauge::RenewalLoops => &self.active_renewal_loops,
        }
    }

    /// Count an open receiver until the guard is dropped
    pub fn receiver_opened(self: &Arc<Self>) -> GaugeGuard {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        let open = self.active_receivers.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_active_receivers.fetch_max(open, Ordering::AcqRel);
        GaugeGuard {
            metrics: Arc::clone(self),
            gauge: Gauge::Receivers,
        }
    }

    /// Count a running renewal loop until the guard is dropped
    pub fn renewal_loop_started(self: &Arc<Self>) -> GaugeGuard {
        self.active_renewal_loops.fetch_add(1, Ordering::AcqRel);
        GaugeGuard {
            metrics: Arc::clone(self),
            gauge: Gauge::RenewalLoops,
        }
    }

    pub fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, count: usize) {
        self.messages_received
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.messages_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.messages_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_receivers(&self) -> usize {
        self.active_receivers.load(Ordering::Acquire)
    }

    pub fn active_renewal_loops(&self) -> usize {
        self.active_renewal_loops.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_receivers: self.active_receivers.load(Ordering::Acquire),
            max_active_receivers: self.max_active_receivers.load(Ordering::Acquire),
            active_renewal_loops: self.active_renewal_loops.load(Ordering::Acquire),
            connections_opened: self.connections_opened.load(Ordering::Acquire),
            connection_failures: self.connection_failures.load(Ordering::Acquire),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Acquire),
            messages_received: self.messages_received.load(Ordering::Acquire),
            messages_completed: self.messages_completed.load(Ordering::Acquire),
            messages_abandoned: self.messages_abandoned.load(Ordering::Acquire),
        }
    }
}
