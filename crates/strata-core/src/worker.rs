//! Cooperative background loops with graceful shutdown.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::DomainError;

/// Handle to a spawned polling loop.
///
/// The loop runs one tick, then sleeps for its interval or until shutdown is
/// signalled. A tick in flight always runs to completion, so shutdown never
/// abandons a claimed batch halfway.
pub struct WorkerHandle {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawns `tick` on the tokio runtime, repeating every `interval`.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            info!(worker = name, interval_ms = interval.as_millis(), "worker started");
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tick().await;
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
            info!(worker = name, "worker stopped");
        });

        Self {
            name,
            shutdown_tx,
            task,
        }
    }

    /// The worker's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` once the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals shutdown and waits for the current tick to finish.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the loop panicked.
    pub async fn shutdown(self) -> Result<(), DomainError> {
        debug!(worker = self.name, "shutdown requested");
        // The receiver may already be gone if the loop exited on its own.
        let _ = self.shutdown_tx.send(true);
        self.task
            .await
            .map_err(|e| DomainError::Infrastructure(format!("worker {} failed: {e}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_worker_ticks_until_shutdown() {
        // Arrange
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        // Act
        let handle = WorkerHandle::spawn("test", Duration::from_millis(5), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await.unwrap();
        let after_shutdown = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Assert
        assert!(after_shutdown >= 2);
        assert_eq!(ticks.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_long_sleep() {
        let handle = WorkerHandle::spawn("sleepy", Duration::from_secs(3600), || async {});
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = tokio::time::timeout(Duration::from_secs(1), handle.shutdown()).await;

        assert!(matches!(result, Ok(Ok(()))));
    }
}
