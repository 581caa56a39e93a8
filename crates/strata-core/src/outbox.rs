//! Transactional outbox and its relay.
//!
//! Entries are written atomically with the events they describe (see
//! [`OutboxPolicy::Enqueue`](crate::store::OutboxPolicy)); the relay later
//! publishes them at-least-once, in creation order per aggregate.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::error::DomainError;
use crate::event::{EventMetadata, EventRecord, StreamId};
use crate::worker::WorkerHandle;

/// A pending or published external message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxEntry {
    /// Store-assigned id, increasing in creation order.
    pub id: i64,
    /// The stream the source event belongs to.
    pub aggregate_id: StreamId,
    /// Global id of the source event.
    pub event_id: i64,
    /// Stream version of the source event; with `aggregate_id` this is the
    /// deduplication key consumers should use.
    pub version: i64,
    /// The source event's type.
    pub event_type: String,
    /// The source event's payload.
    pub payload: serde_json::Value,
    /// The source event's metadata.
    pub metadata: EventMetadata,
    /// When the entry was staged.
    pub created_at: DateTime<Utc>,
    /// Whether the entry has been published.
    pub published: bool,
    /// When it was published.
    pub published_at: Option<DateTime<Utc>>,
    /// Failed publish attempts.
    pub retry_count: i32,
    /// Set once `retry_count` reaches the relay's limit.
    pub dead_lettered: bool,
    /// The latest publish failure.
    pub last_error: Option<String>,
}

impl OutboxEntry {
    /// Builds an unpublished entry for a freshly appended event. The id is
    /// assigned by the store.
    #[must_use]
    pub fn pending(event: &EventRecord) -> Self {
        Self {
            id: 0,
            aggregate_id: event.stream_id.clone(),
            event_id: event.id,
            version: event.version,
            event_type: event.event_type.clone(),
            payload: event.data.clone(),
            metadata: event.metadata.clone(),
            created_at: event.occurred_at,
            published: false,
            published_at: None,
            retry_count: 0,
            dead_lettered: false,
            last_error: None,
        }
    }
}

/// Outbox counters for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    /// All entries.
    pub total: i64,
    /// Entries awaiting publication, excluding dead letters.
    pub pending: i64,
    /// Published entries not yet purged.
    pub published: i64,
    /// Entries that exhausted their retries.
    pub dead_lettered: i64,
    /// Highest retry count among unpublished entries.
    pub max_retry_count: i32,
}

/// Entries claimed for one relay pass. Updates made through the batch become
/// visible on [`OutboxBatch::commit`].
#[async_trait]
pub trait OutboxBatch: Send {
    /// The claimed entries, ordered by aggregate then creation.
    fn entries(&self) -> &[OutboxEntry];

    /// Marks an entry as published.
    async fn mark_published(&mut self, id: i64, at: DateTime<Utc>) -> Result<(), DomainError>;

    /// Counts a failed attempt, optionally moving the entry to dead letters.
    async fn record_failure(
        &mut self,
        id: i64,
        error: &str,
        dead_letter: bool,
    ) -> Result<(), DomainError>;

    /// Persists the batch's updates and releases the claim.
    async fn commit(self: Box<Self>) -> Result<(), DomainError>;
}

/// Outbox storage.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claims up to `limit` unpublished, non-dead-lettered entries, skipping
    /// entries claimed by another relay.
    async fn claim_unpublished(&self, limit: i64) -> Result<Box<dyn OutboxBatch>, DomainError>;

    /// Entries for one aggregate, in creation order.
    async fn fetch_by_aggregate(
        &self,
        aggregate_id: &StreamId,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, DomainError>;

    /// Dead-lettered entries, oldest first.
    async fn dead_letters(&self, limit: i64) -> Result<Vec<OutboxEntry>, DomainError>;

    /// Returns a dead-lettered entry to the queue with a fresh retry count.
    /// Returns `false` if no such dead letter exists.
    async fn requeue(&self, id: i64) -> Result<bool, DomainError>;

    /// Deletes published entries published before `older_than`.
    async fn purge_published(&self, older_than: DateTime<Utc>) -> Result<u64, DomainError>;

    /// Current counters.
    async fn stats(&self) -> Result<OutboxStats, DomainError>;
}

/// Failure reported by a message transport.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PublishError(pub String);

/// External message transport.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes one entry to `topic`.
    async fn publish(&self, topic: &str, entry: &OutboxEntry) -> Result<(), PublishError>;
}

/// Derives a dotted lowercase topic from an event type:
/// `OrderCreated` becomes `order.created`.
#[must_use]
pub fn topic_for(event_type: &str) -> String {
    let chars: Vec<char> = event_type.chars().collect();
    let mut topic = String::with_capacity(event_type.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '.' || c == '-' {
            if !topic.is_empty() && !topic.ends_with('.') {
                topic.push('.');
            }
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_lower);
            if boundary && !topic.ends_with('.') {
                topic.push('.');
            }
        }
        topic.extend(c.to_lowercase());
    }
    topic
}

/// Tuning for the outbox relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Entries claimed per pass.
    pub batch_size: i64,
    /// Failed attempts after which an entry is dead-lettered.
    pub max_retries: i32,
    /// How long published entries are kept before purging.
    pub retention: TimeDelta,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 5,
            retention: TimeDelta::days(7),
        }
    }
}

/// Counters for one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Entries published.
    pub published: usize,
    /// Entries that failed and stay queued.
    pub failed: usize,
    /// Entries moved to dead letters.
    pub dead_lettered: usize,
    /// Entries held back behind an earlier failure of the same aggregate.
    pub deferred: usize,
}

/// Moves staged outbox entries to a [`MessagePublisher`].
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxStore>,
    publisher: Arc<dyn MessagePublisher>,
    clock: Arc<dyn Clock>,
    config: RelayConfig,
}

impl OutboxRelay {
    /// Creates a relay.
    #[must_use]
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        publisher: Arc<dyn MessagePublisher>,
        clock: Arc<dyn Clock>,
        config: RelayConfig,
    ) -> Self {
        Self {
            outbox,
            publisher,
            clock,
            config,
        }
    }

    /// Claims one batch and publishes it. Once an entry fails, later entries
    /// of the same aggregate wait for the next pass.
    ///
    /// # Errors
    ///
    /// Propagates outbox store failures; publish failures are recorded on the
    /// entries instead.
    #[instrument(skip_all)]
    pub async fn publish_once(&self) -> Result<RelayOutcome, DomainError> {
        let mut batch = self
            .outbox
            .claim_unpublished(self.config.batch_size)
            .await?;
        let entries = batch.entries().to_vec();

        let mut outcome = RelayOutcome::default();
        let mut blocked: HashSet<StreamId> = HashSet::new();

        for entry in &entries {
            if blocked.contains(&entry.aggregate_id) {
                outcome.deferred += 1;
                continue;
            }

            let topic = topic_for(&entry.event_type);
            match self.publisher.publish(&topic, entry).await {
                Ok(()) => {
                    batch.mark_published(entry.id, self.clock.now()).await?;
                    outcome.published += 1;
                    debug!(entry_id = entry.id, %topic, "outbox entry published");
                }
                Err(e) => {
                    let attempts = entry.retry_count + 1;
                    let dead_letter = attempts >= self.config.max_retries;
                    batch
                        .record_failure(entry.id, &e.to_string(), dead_letter)
                        .await?;
                    blocked.insert(entry.aggregate_id.clone());
                    if dead_letter {
                        outcome.dead_lettered += 1;
                        error!(
                            entry_id = entry.id,
                            aggregate_id = %entry.aggregate_id,
                            attempts,
                            error = %e,
                            "outbox entry dead-lettered"
                        );
                    } else {
                        outcome.failed += 1;
                        warn!(
                            entry_id = entry.id,
                            aggregate_id = %entry.aggregate_id,
                            attempts,
                            error = %e,
                            "outbox publish failed"
                        );
                    }
                }
            }
        }

        batch.commit().await?;
        if !entries.is_empty() {
            info!(
                published = outcome.published,
                failed = outcome.failed,
                dead_lettered = outcome.dead_lettered,
                "outbox pass completed"
            );
        }
        Ok(outcome)
    }

    /// Publishes until a pass finds nothing publishable.
    ///
    /// # Errors
    ///
    /// Propagates outbox store failures.
    pub async fn drain(&self) -> Result<usize, DomainError> {
        let mut published = 0;
        loop {
            let outcome = self.publish_once().await?;
            published += outcome.published;
            if outcome.published == 0 {
                return Ok(published);
            }
        }
    }

    /// Deletes published entries older than the retention window.
    ///
    /// # Errors
    ///
    /// Propagates outbox store failures.
    pub async fn purge_expired(&self) -> Result<u64, DomainError> {
        let cutoff = self.clock.now() - self.config.retention;
        let purged = self.outbox.purge_published(cutoff).await?;
        if purged > 0 {
            info!(purged, "purged published outbox entries");
        }
        Ok(purged)
    }

    /// Spawns the relay loop. Each tick publishes one batch and purges
    /// expired entries.
    #[must_use]
    pub fn spawn(self: Arc<Self>, interval: Duration) -> WorkerHandle {
        WorkerHandle::spawn("outbox-relay", interval, move || {
            let relay = Arc::clone(&self);
            async move {
                if let Err(e) = relay.publish_once().await {
                    error!(error = %e, "outbox pass failed");
                }
                if let Err(e) = relay.purge_expired().await {
                    error!(error = %e, "outbox purge failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_for_camel_case() {
        assert_eq!(topic_for("OrderCreated"), "order.created");
        assert_eq!(topic_for("OrderItemAdded"), "order.item.added");
    }

    #[test]
    fn test_topic_for_acronyms_and_digits() {
        assert_eq!(topic_for("HTTPRequestSent"), "http.request.sent");
        assert_eq!(topic_for("V2Migrated"), "v2.migrated");
    }

    #[test]
    fn test_topic_for_already_separated() {
        assert_eq!(topic_for("order_created"), "order.created");
        assert_eq!(topic_for("order.created"), "order.created");
        assert_eq!(topic_for("Placed"), "placed");
    }

    #[test]
    fn test_relay_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retention, TimeDelta::days(7));
    }
}
