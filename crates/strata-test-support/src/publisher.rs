//! Message publishers for outbox relay tests.

use std::sync::Mutex;

use async_trait::async_trait;
use strata_core::outbox::{MessagePublisher, OutboxEntry, PublishError};

/// A publisher that records every message it accepts.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, OutboxEntry)>>,
}

impl RecordingPublisher {
    /// Creates an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepted `(topic, entry)` pairs, in publish order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<(String, OutboxEntry)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, entry: &OutboxEntry) -> Result<(), PublishError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_owned(), entry.clone()));
        Ok(())
    }
}

/// A publisher that rejects the first `n` calls, then records like
/// [`RecordingPublisher`].
#[derive(Debug, Default)]
pub struct FlakyPublisher {
    remaining_failures: Mutex<usize>,
    attempts: Mutex<usize>,
    inner: RecordingPublisher,
}

impl FlakyPublisher {
    /// Fails the first `n` publish calls.
    #[must_use]
    pub fn failing_first(n: usize) -> Self {
        Self {
            remaining_failures: Mutex::new(n),
            ..Self::default()
        }
    }

    /// Publish calls made so far, failed or not.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    /// Accepted `(topic, entry)` pairs.
    pub fn published(&self) -> Vec<(String, OutboxEntry)> {
        self.inner.published()
    }
}

#[async_trait]
impl MessagePublisher for FlakyPublisher {
    async fn publish(&self, topic: &str, entry: &OutboxEntry) -> Result<(), PublishError> {
        *self.attempts.lock().unwrap() += 1;
        {
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PublishError("broker unavailable".into()));
            }
        }
        self.inner.publish(topic, entry).await
    }
}
