//! Outbound backpressure as a ready/not-ready signal.
//!
//! Each stream's writer counts the parts queued but not yet written. While
//! that count is below the limit the stream is *ready*; once it reaches the
//! limit the stream is *not ready* and a further write is a caller error
//! ([`GrpcWireError::NotReady`]), not a queued operation.
//!
//! A caller that sees not-ready registers for a one-shot notification with
//! [`BackpressureController::on_ready`]; it fires when the writer drains the
//! queue back under the limit. There is a single notification slot per
//! stream: registering again replaces the previous waiter, whose receiver then
//! resolves with an error.
//!
//! Terminal parts (trailers, resets) are reserved with
//! [`BackpressureController::reserve_terminal`] and bypass the limit, so a
//! full queue can always be closed.
//!
//! # Example
//!
//! ```
//! use grpc_wire::backpressure::BackpressureController;
//!
//! let ctrl = BackpressureController::new(1);
//! ctrl.try_reserve().unwrap();
//! assert!(!ctrl.is_ready());
//!
//! let mut ready = ctrl.on_ready();
//! ctrl.release_many(1);
//! assert!(ready.try_recv().is_ok());
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::{GrpcWireError, Result};

/// Default maximum pending parts before a stream reports not-ready.
pub const DEFAULT_MAX_PENDING: usize = 64;

#[derive(Debug)]
struct Shared {
    /// Current pending part count.
    pending: AtomicUsize,
    /// Single-slot drain notification.
    waiter: Mutex<Option<oneshot::Sender<()>>>,
}

/// Backpressure controller shared between a stream and its writer task.
///
/// Uses atomic operations for lock-free tracking of pending part counts.
/// The mutex only guards the notification slot.
#[derive(Debug, Clone)]
pub struct BackpressureController {
    shared: Arc<Shared>,
    /// Maximum allowed pending parts.
    max_pending: usize,
}

impl BackpressureController {
    /// Create a new backpressure controller with specified limit.
    pub fn new(max_pending: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: AtomicUsize::new(0),
                waiter: Mutex::new(None),
            }),
            max_pending: max_pending.max(1),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<oneshot::Sender<()>>> {
        self.shared
            .waiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Check if another write is allowed.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.pending_count() < self.max_pending
    }

    /// Get current pending count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Get maximum pending limit.
    #[inline]
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Get available capacity.
    #[inline]
    pub fn available_capacity(&self) -> usize {
        self.max_pending.saturating_sub(self.pending_count())
    }

    /// Reserve a slot for a regular part.
    ///
    /// Returns `Err(NotReady)` if the stream is at capacity.
    pub fn try_reserve(&self) -> Result<()> {
        let mut current = self.shared.pending.load(Ordering::Acquire);
        loop {
            if current >= self.max_pending {
                return Err(GrpcWireError::NotReady);
            }
            match self.shared.pending.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Reserve a slot for a terminal part, ignoring the limit.
    #[inline]
    pub fn reserve_terminal(&self) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Release slots once parts are written, notifying a waiter if the
    /// stream became ready.
    pub fn release_many(&self, count: usize) {
        if count == 0 {
            return;
        }
        let _ = self
            .shared
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(count))
            });
        if self.is_ready() {
            self.notify();
        }
    }

    /// Register for the next transition to ready.
    ///
    /// Resolves immediately if the stream is already ready. Replaces any
    /// previously registered waiter.
    pub fn on_ready(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.slot() = Some(tx);
        if self.is_ready() {
            self.notify();
        }
        rx
    }

    /// Wait until the stream is ready.
    pub async fn ready(&self) {
        while !self.is_ready() {
            if self.on_ready().await.is_err() {
                // Replaced by another waiter; check again.
                tokio::task::yield_now().await;
            }
        }
    }

    fn notify(&self) {
        if let Some(tx) = self.slot().take() {
            let _ = tx.send(());
        }
    }
}

impl Default for BackpressureController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}
