//! # Session Slot Pool
//!
//! Bounds how many sessions a subscription holds at once.
//!
//! A [`SessionSlot`] is acquired before a session is accepted and released by
//! `Drop` when the session's lifecycle ends, on every exit path. Each slot owns
//! its own [`ExponentialBackoff`], so a session that keeps failing slows only
//! its own slot. Slot state (including backoff progress) survives release and
//! is handed to the next acquirer of that slot.
//!
//! ### Cancellation semantics
//! - [`SessionSlotPool::acquire`] waits for capacity or cancellation, whichever
//!   comes first, and returns `None` on cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::resilience::{BackoffConfig, ExponentialBackoff};

/// Per-slot state that outlives any single session
#[derive(Debug)]
struct SlotState {
    id: usize,
    backoff: ExponentialBackoff,
}

#[derive(Debug)]
struct PoolInner {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    free: Mutex<Vec<SlotState>>,
    in_use: AtomicUsize,
    high_water_mark: AtomicUsize,
}

/// Fixed-capacity pool of session slots
#[derive(Debug, Clone)]
pub struct SessionSlotPool {
    inner: Arc<PoolInner>,
}

impl SessionSlotPool {
    pub fn new(capacity: usize, backoff: BackoffConfig) -> Self {
        let capacity = capacity.max(1);
        let free = (0..capacity)
            .rev()
            .map(|id| SlotState {
                id,
                backoff: ExponentialBackoff::new(backoff),
            })
            .collect();

        Self {
            inner: Arc::new(PoolInner {
                capacity,
                semaphore: Arc::new(Semaphore::new(capacity)),
                free: Mutex::new(free),
                in_use: AtomicUsize::new(0),
                high_water_mark: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a free slot; `None` if `token` is cancelled first
    pub async fn acquire(&self, token: &CancellationToken) -> Option<SessionSlot> {
        if token.is_cancelled() {
            return None;
        }

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            permit = Arc::clone(&self.inner.semaphore).acquire_owned() => permit.ok()?,
        };

        // A permit guarantees a free slot
        let state = self.inner.free.lock().pop()?;

        let in_use = self.inner.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner
            .high_water_mark
            .fetch_max(in_use, Ordering::AcqRel);

        Some(SessionSlot {
            state: Some(state),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Largest number of slots ever held at the same time
    pub fn high_water_mark(&self) -> usize {
        self.inner.high_water_mark.load(Ordering::Acquire)
    }
}

/// One unit of pool capacity; released on drop
#[derive(Debug)]
pub struct SessionSlot {
    state: Option<SlotState>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl SessionSlot {
    pub fn id(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.id)
    }

    /// The slot's own reconnect backoff
    pub fn backoff_mut(&mut self) -> Option<&mut ExponentialBackoff> {
        self.state.as_mut().map(|s| &mut s.backoff)
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        // Return slot state before the permit is released by field drop
        if let Some(state) = self.state.take() {
            self.pool.free.lock().push(state);
        }
        self.pool.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}
