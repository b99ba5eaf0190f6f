//! Shutdown signalling
//!
//! Watch-based flag that loader workers poll between records and await
//! while blocked on a full queue.

use std::sync::Arc;
use tokio::sync::watch;

/// Shutdown signal shared by a loader and its workers
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    /// Whether shutdown was triggered
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once shutdown is triggered, immediately if it already was
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_signal() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();

        let handle = tokio::spawn(async move {
            waiter.wait().await;
            42
        });

        signal.shutdown();
        assert_eq!(handle.await.unwrap(), 42);
        assert!(signal.is_shutdown());

        // Late waiters return immediately
        signal.wait().await;
    }
}
