//! Cancellation signal shared by every unit scheduled within one operator
//! call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cloneable token signalling that an in-flight operator call should stop
/// scheduling new units and wind down outstanding ones.
///
/// Cancelling does not forcibly abort a unit already running; it is
/// observed at the next await point (between retry attempts, and before
/// starting a unit that has not yet acquired its permit).
#[derive(Clone)]
pub struct SwarmCancellation {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl SwarmCancellation {
    /// A fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        SwarmCancellation { inner: Arc::new(Inner { cancelled: AtomicBool::new(false), notify: Notify::new() }) }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled; resolves immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            self.inner.notify.notified().await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl Default for SwarmCancellation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_cancelled() {
        assert!(!SwarmCancellation::new().is_cancelled());
    }

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let token = SwarmCancellation::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_resolves_immediately() {
        let token = SwarmCancellation::new();
        token.cancel();
        token.cancelled().await;
    }
}
