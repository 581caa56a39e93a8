//! Event store port.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::event::{EventRecord, NewEvent, StreamId};

/// Whether an append also stages its events for external publishing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutboxPolicy {
    /// Append events only.
    #[default]
    Skip,
    /// Insert one outbox entry per event in the same atomic unit as the append.
    Enqueue,
}

/// Append-only, per-stream versioned event storage with optimistic concurrency.
///
/// Implementations must compute the stream's current version inside the same
/// atomic unit that performs the insert and reject the whole write on a
/// mismatch. A storage-level uniqueness violation on `(stream_id, version)` is
/// reported as the same `ConcurrencyConflict`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` with consecutive versions starting at
    /// `expected_version + 1`, optionally staging outbox entries atomically.
    /// All-or-nothing. An empty batch is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if the stream's current
    /// version is not `expected_version`.
    async fn append_batch_with(
        &self,
        stream_id: &StreamId,
        events: Vec<NewEvent>,
        expected_version: i64,
        outbox: OutboxPolicy,
    ) -> Result<Vec<EventRecord>, DomainError>;

    /// Returns events with `version > from_version`, ascending by version.
    async fn read_stream(
        &self,
        stream_id: &StreamId,
        from_version: i64,
    ) -> Result<Vec<EventRecord>, DomainError>;

    /// Returns the stream's highest version, or 0 if it has no events.
    async fn stream_version(&self, stream_id: &StreamId) -> Result<i64, DomainError>;

    /// Returns up to `limit` events with `id > from_id`, ascending by id.
    async fn read_all(&self, from_id: i64, limit: i64) -> Result<Vec<EventRecord>, DomainError>;

    /// Returns up to `limit` events of one type, ascending by id.
    async fn read_by_type(
        &self,
        event_type: &str,
        limit: i64,
    ) -> Result<Vec<EventRecord>, DomainError>;

    /// Looks up a single event by its global id.
    async fn read_event(&self, id: i64) -> Result<Option<EventRecord>, DomainError>;

    /// Appends a single event at `expected_version + 1`.
    ///
    /// # Errors
    ///
    /// See [`EventStore::append_batch_with`].
    async fn append(
        &self,
        stream_id: &StreamId,
        event: NewEvent,
        expected_version: i64,
    ) -> Result<EventRecord, DomainError> {
        self.append_batch(stream_id, vec![event], expected_version)
            .await?
            .pop()
            .ok_or_else(|| DomainError::Infrastructure("append returned no record".into()))
    }

    /// Appends a batch without outbox staging.
    ///
    /// # Errors
    ///
    /// See [`EventStore::append_batch_with`].
    async fn append_batch(
        &self,
        stream_id: &StreamId,
        events: Vec<NewEvent>,
        expected_version: i64,
    ) -> Result<Vec<EventRecord>, DomainError> {
        self.append_batch_with(stream_id, events, expected_version, OutboxPolicy::Skip)
            .await
    }

    /// Returns `true` if the stream has at least one event.
    async fn stream_exists(&self, stream_id: &StreamId) -> Result<bool, DomainError> {
        Ok(self.stream_version(stream_id).await? > 0)
    }
}

/// Compares the caller's expected version with the version observed inside
/// the store's atomic unit.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a negative expectation and
/// `DomainError::ConcurrencyConflict` on mismatch.
pub fn check_expected_version(
    stream_id: &StreamId,
    expected: i64,
    actual: i64,
) -> Result<(), DomainError> {
    if expected < 0 {
        return Err(DomainError::Validation(format!(
            "expected version must be non-negative, got {expected}"
        )));
    }
    if expected != actual {
        return Err(DomainError::ConcurrencyConflict {
            stream_id: stream_id.clone(),
            expected,
            actual,
        });
    }
    Ok(())
}
