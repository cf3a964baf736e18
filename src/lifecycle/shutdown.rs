//! Shutdown coordination.

use tokio::sync::watch;

/// Latched shutdown flag shared by the listeners and the maintenance timer.
///
/// Once triggered it stays triggered, so a task that starts waiting after
/// the fact still observes it.
#[derive(Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Fire the signal. Idempotent.
    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            tracing::debug!(waiters = self.tx.receiver_count(), "Shutdown triggered");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once `trigger` has been called.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // Only errors when the sender is gone, and we hold it.
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Tasks currently blocked in `wait`.
    pub fn waiters(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
