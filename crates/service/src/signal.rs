//! One-way latches for shutdown, interruption, cancellation, and the
//! startup ready gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A latch observable from many tasks. Once triggered it stays
/// triggered; waiters registered before or after the trigger all wake.
///
/// Clones share the same latch.
#[derive(Clone, Default)]
pub struct Signal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    set: AtomicBool,
    notify: Notify,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the signal and wake every current and future waiter.
    pub fn trigger(&self) {
        self.inner.set.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Wait until the signal fires. Resolves immediately if it already
    /// has.
    pub async fn triggered(&self) {
        loop {
            // Register interest before checking the flag so a trigger
            // between the check and the await cannot be missed.
            let notified = self.inner.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}
