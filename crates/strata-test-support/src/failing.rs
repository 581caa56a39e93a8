//! Stores that fail every call. Useful for testing error-handling paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strata_core::error::DomainError;
use strata_core::event::{EventRecord, NewEvent, StreamId};
use strata_core::snapshot::{Snapshot, SnapshotStore};
use strata_core::store::{EventStore, OutboxPolicy};

fn refused() -> DomainError {
    DomainError::Infrastructure("connection refused".into())
}

/// An event store that always returns an infrastructure error.
#[derive(Debug)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append_batch_with(
        &self,
        _stream_id: &StreamId,
        _events: Vec<NewEvent>,
        _expected_version: i64,
        _outbox: OutboxPolicy,
    ) -> Result<Vec<EventRecord>, DomainError> {
        Err(refused())
    }

    async fn read_stream(
        &self,
        _stream_id: &StreamId,
        _from_version: i64,
    ) -> Result<Vec<EventRecord>, DomainError> {
        Err(refused())
    }

    async fn stream_version(&self, _stream_id: &StreamId) -> Result<i64, DomainError> {
        Err(refused())
    }

    async fn read_all(&self, _from_id: i64, _limit: i64) -> Result<Vec<EventRecord>, DomainError> {
        Err(refused())
    }

    async fn read_by_type(
        &self,
        _event_type: &str,
        _limit: i64,
    ) -> Result<Vec<EventRecord>, DomainError> {
        Err(refused())
    }

    async fn read_event(&self, _id: i64) -> Result<Option<EventRecord>, DomainError> {
        Err(refused())
    }
}

/// A snapshot store that always returns an infrastructure error. Snapshot
/// failures must never break loads or saves.
#[derive(Debug)]
pub struct FailingSnapshotStore;

#[async_trait]
impl SnapshotStore for FailingSnapshotStore {
    async fn save(&self, _snapshot: Snapshot) -> Result<(), DomainError> {
        Err(refused())
    }

    async fn find(&self, _stream_id: &StreamId) -> Result<Option<Snapshot>, DomainError> {
        Err(refused())
    }

    async fn delete(&self, _stream_id: &StreamId) -> Result<(), DomainError> {
        Err(refused())
    }

    async fn all(&self) -> Result<Vec<Snapshot>, DomainError> {
        Err(refused())
    }

    async fn cleanup(&self, _older_than: DateTime<Utc>) -> Result<u64, DomainError> {
        Err(refused())
    }
}
