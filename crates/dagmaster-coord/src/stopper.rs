use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Process-wide cooperative cancellation token, shared by the cluster
/// controller, the DAG engines and the server's heartbeat loop. Replaces the
/// legacy design's global mutable stop flag with an explicit, cloneable
/// handle threaded through constructors.
#[derive(Debug, Clone)]
pub struct Stopper {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for Stopper {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopper {
    pub fn new() -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already stopped; otherwise waits for the next
    /// `stop()` call. Intended for use in `tokio::select!` alongside a sleep
    /// so loops wake promptly on shutdown rather than at the next tick.
    pub async fn stopped(&self) {
        if self.is_stopped() {
            return;
        }
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stopped_resolves_after_stop_is_called() {
        let stopper = Stopper::new();
        assert!(!stopper.is_stopped());
        let waiter = stopper.clone();
        let handle = tokio::spawn(async move {
            waiter.stopped().await;
        });
        stopper.stop();
        handle.await.unwrap();
        assert!(stopper.is_stopped());
    }

    #[tokio::test]
    async fn stopped_returns_immediately_if_already_stopped() {
        let stopper = Stopper::new();
        stopper.stop();
        tokio::time::timeout(std::time::Duration::from_millis(50), stopper.stopped())
            .await
            .expect("stopped() should not block once stop() was already called");
    }
}
