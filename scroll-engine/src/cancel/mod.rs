//! Cooperative cancellation with reason propagation.
//!
//! Cancellation never interrupts in-flight I/O; the driver consults the
//! handle at every state transition and terminates at the next one. The
//! handle also carries the wall-clock timeout observation, which uses the
//! same cooperative mechanism but terminates through the timeout path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    timed_out: AtomicBool,
    reason: Mutex<Option<String>>,
}

/// Shared cancellation state for one bulk-by-scroll request.
///
/// Cloning is cheap; all clones observe the same state. `cancel` is
/// idempotent and only the first reason is retained.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    inner: Arc<Inner>,
}

impl CancellationHandle {
    /// Create a fresh, uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation with a human-readable reason.
    ///
    /// The first call wins; later calls are no-ops.
    pub fn cancel(&self, reason: impl Into<String>) {
        let mut slot = self.inner.reason.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(reason.into());
            self.inner.cancelled.store(true, Ordering::Release);
        }
    }

    /// Whether cancellation was requested. Cheap enough to consult at every
    /// state transition.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// The reason passed to the first `cancel` call, if any.
    pub fn reason(&self) -> Option<String> {
        self.inner
            .reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Record that the request's wall-clock budget lapsed.
    pub fn mark_timed_out(&self) {
        self.inner.timed_out.store(true, Ordering::Release);
    }

    /// Whether the wall-clock budget lapsed.
    pub fn is_timed_out(&self) -> bool {
        self.inner.timed_out.load(Ordering::Acquire)
    }
}
