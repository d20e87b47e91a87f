//! Subscription lifecycle observer.
//!
//! Every method has a no-op default; implement only what you need. Calls are
//! made inline from supervisor tasks, so implementations must not block.

use std::time::Duration;

use crate::messaging::MessagingError;

pub trait SubscriptionObserver: Send + Sync + 'static {
    /// A receiver was opened (session receivers report their session)
    fn on_connected(&self, _topic: &str, _session_id: Option<&str>) {}

    /// First message delivered on a connection; once per connection
    fn on_first_success(&self, _topic: &str, _session_id: Option<&str>) {}

    /// Connecting failed or an open connection was lost
    fn on_connection_lost(&self, _topic: &str, _error: &MessagingError) {}

    /// Next connect attempt starts after `delay`
    fn on_reconnect_scheduled(&self, _topic: &str, _delay: Duration) {}

    fn on_receiver_closed(&self, _topic: &str, _session_id: Option<&str>) {}

    /// Lock renewal hit an error that ends the connection
    fn on_lock_renewal_failed(&self, _topic: &str, _error: &MessagingError) {}

    /// The subscription's supervisor exited
    fn on_stopped(&self, _topic: &str) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SubscriptionObserver for NoopObserver {}
