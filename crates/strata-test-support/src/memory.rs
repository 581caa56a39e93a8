//! In-memory adapters sharing one state, mirroring a single database.
//!
//! [`InMemoryEventStore`] owns the state; [`InMemoryEventStore::checkpoints`]
//! and [`InMemoryEventStore::outbox`] hand out adapters over the same events
//! and outbox rows, the way the `PostgreSQL` adapters share one pool.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strata_core::clock::{Clock, SystemClock};
use strata_core::error::DomainError;
use strata_core::event::{EventRecord, NewEvent, StreamId};
use strata_core::outbox::{OutboxBatch, OutboxEntry, OutboxStats, OutboxStore};
use strata_core::projection::{
    CheckpointStore, ClaimedBatch, ProjectionErrorRecord, ProjectionPosition,
};
use strata_core::snapshot::{Snapshot, SnapshotStore};
use strata_core::store::{EventStore, OutboxPolicy, check_expected_version};

fn to_usize(limit: i64) -> usize {
    usize::try_from(limit).unwrap_or(0)
}

#[derive(Debug, Default)]
struct State {
    events: Vec<EventRecord>,
    outbox: Vec<OutboxEntry>,
    next_outbox_id: i64,
    positions: HashMap<String, ProjectionPosition>,
    errors: BTreeMap<(String, i64), ProjectionErrorRecord>,
    claimed_events: HashSet<i64>,
    claimed_outbox: HashSet<i64>,
}

impl State {
    fn stream_version(&self, stream_id: &StreamId) -> i64 {
        self.events
            .iter()
            .filter(|e| &e.stream_id == stream_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(0)
    }
}

type Shared = Arc<Mutex<State>>;

/// An event store holding everything in memory.
#[derive(Clone)]
pub struct InMemoryEventStore {
    state: Shared,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Creates an empty store stamping events with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamps events with `clock` instead.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// A checkpoint store over this store's events.
    #[must_use]
    pub fn checkpoints(&self) -> InMemoryCheckpointStore {
        InMemoryCheckpointStore {
            state: Arc::clone(&self.state),
        }
    }

    /// An outbox store over this store's outbox rows.
    #[must_use]
    pub fn outbox(&self) -> InMemoryOutboxStore {
        InMemoryOutboxStore {
            state: Arc::clone(&self.state),
        }
    }

    /// Every stored event, ascending by id.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn events(&self) -> Vec<EventRecord> {
        self.state.lock().unwrap().events.clone()
    }

    /// Inserts a record as-is, bypassing version checks. Used to simulate
    /// corrupted streams.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn insert_raw(&self, mut record: EventRecord) {
        let mut state = self.state.lock().unwrap();
        record.id = state.events.last().map_or(1, |e| e.id + 1);
        state.events.push(record);
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_batch_with(
        &self,
        stream_id: &StreamId,
        events: Vec<NewEvent>,
        expected_version: i64,
        outbox: OutboxPolicy,
    ) -> Result<Vec<EventRecord>, DomainError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        let actual = state.stream_version(stream_id);
        check_expected_version(stream_id, expected_version, actual)?;

        let mut records = Vec::with_capacity(events.len());
        let mut version = expected_version;
        for event in events {
            version += 1;
            let record = EventRecord {
                id: state.events.last().map_or(1, |e| e.id + 1),
                stream_id: stream_id.clone(),
                version,
                event_type: event.event_type,
                data: event.data,
                metadata: event.metadata,
                occurred_at: now,
            };
            state.events.push(record.clone());
            if outbox == OutboxPolicy::Enqueue {
                state.next_outbox_id += 1;
                let mut entry = OutboxEntry::pending(&record);
                entry.id = state.next_outbox_id;
                state.outbox.push(entry);
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn read_stream(
        &self,
        stream_id: &StreamId,
        from_version: i64,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let state = self.state.lock().unwrap();
        let mut records: Vec<EventRecord> = state
            .events
            .iter()
            .filter(|e| &e.stream_id == stream_id && e.version > from_version)
            .cloned()
            .collect();
        records.sort_by_key(|e| e.version);
        Ok(records)
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<i64, DomainError> {
        Ok(self.state.lock().unwrap().stream_version(stream_id))
    }

    async fn read_all(&self, from_id: i64, limit: i64) -> Result<Vec<EventRecord>, DomainError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .filter(|e| e.id > from_id)
            .take(to_usize(limit))
            .cloned()
            .collect())
    }

    async fn read_by_type(
        &self,
        event_type: &str,
        limit: i64,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .take(to_usize(limit))
            .cloned()
            .collect())
    }

    async fn read_event(&self, id: i64) -> Result<Option<EventRecord>, DomainError> {
        let state = self.state.lock().unwrap();
        Ok(state.events.iter().find(|e| e.id == id).cloned())
    }
}

/// Claimed events; the claim is released when the batch is dropped.
struct MemoryClaim {
    state: Shared,
    events: Vec<EventRecord>,
}

impl Drop for MemoryClaim {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            for event in &self.events {
                state.claimed_events.remove(&event.id);
            }
        }
    }
}

#[async_trait]
impl ClaimedBatch for MemoryClaim {
    fn events(&self) -> &[EventRecord] {
        &self.events
    }

    async fn release(self: Box<Self>) -> Result<(), DomainError> {
        Ok(())
    }
}

/// Projection checkpoints and errors held in memory.
#[derive(Clone)]
pub struct InMemoryCheckpointStore {
    state: Shared,
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn claim_batch(
        &self,
        after_id: i64,
        limit: i64,
    ) -> Result<Box<dyn ClaimedBatch>, DomainError> {
        let mut state = self.state.lock().unwrap();
        let events: Vec<EventRecord> = state
            .events
            .iter()
            .filter(|e| e.id > after_id && !state.claimed_events.contains(&e.id))
            .take(to_usize(limit))
            .cloned()
            .collect();
        for event in &events {
            state.claimed_events.insert(event.id);
        }
        Ok(Box::new(MemoryClaim {
            state: Arc::clone(&self.state),
            events,
        }))
    }

    async fn position(&self, projector: &str) -> Result<i64, DomainError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .positions
            .get(projector)
            .map_or(0, |p| p.last_event_id))
    }

    async fn positions(&self) -> Result<Vec<ProjectionPosition>, DomainError> {
        let state = self.state.lock().unwrap();
        let mut positions: Vec<ProjectionPosition> = state.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.projector_name.cmp(&b.projector_name));
        Ok(positions)
    }

    async fn advance(
        &self,
        projector: &str,
        event_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().unwrap();
        let position = state
            .positions
            .entry(projector.to_owned())
            .or_insert_with(|| ProjectionPosition {
                projector_name: projector.to_owned(),
                last_event_id: 0,
                last_processed_at: None,
            });
        position.last_event_id = position.last_event_id.max(event_id);
        position.last_processed_at = Some(at);
        Ok(())
    }

    async fn reset(&self, projector: &str) -> Result<(), DomainError> {
        let mut state = self.state.lock().unwrap();
        state.positions.remove(projector);
        state.errors.retain(|(name, _), _| name != projector);
        Ok(())
    }

    async fn record_error(&self, record: ProjectionErrorRecord) -> Result<(), DomainError> {
        let mut state = self.state.lock().unwrap();
        state
            .errors
            .insert((record.projector_name.clone(), record.event_id), record);
        Ok(())
    }

    async fn find_error(
        &self,
        projector: &str,
        event_id: i64,
    ) -> Result<Option<ProjectionErrorRecord>, DomainError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .errors
            .get(&(projector.to_owned(), event_id))
            .cloned())
    }

    async fn clear_error(&self, projector: &str, event_id: i64) -> Result<(), DomainError> {
        let mut state = self.state.lock().unwrap();
        state.errors.remove(&(projector.to_owned(), event_id));
        Ok(())
    }

    async fn errored_event_ids(
        &self,
        projector: &str,
        after_id: i64,
        up_to_id: i64,
    ) -> Result<Vec<i64>, DomainError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .errors
            .keys()
            .filter(|(name, id)| name == projector && *id > after_id && *id <= up_to_id)
            .map(|(_, id)| *id)
            .collect())
    }

    async fn due_errors(
        &self,
        now: DateTime<Utc>,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<ProjectionErrorRecord>, DomainError> {
        let state = self.state.lock().unwrap();
        let mut due: Vec<ProjectionErrorRecord> = state
            .errors
            .values()
            .filter(|r| r.next_retry_at <= now && r.retry_count < max_retries)
            .cloned()
            .collect();
        due.sort_by_key(|r| (r.next_retry_at, r.event_id));
        due.truncate(to_usize(limit));
        Ok(due)
    }

    async fn exhausted_errors(
        &self,
        max_retries: i32,
    ) -> Result<Vec<ProjectionErrorRecord>, DomainError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .errors
            .values()
            .filter(|r| r.retry_count >= max_retries)
            .cloned()
            .collect())
    }
}

enum OutboxUpdate {
    Published(i64, DateTime<Utc>),
    Failed(i64, String, bool),
}

/// Claimed outbox entries; updates apply on commit, the claim is released
/// on drop.
struct MemoryOutboxBatch {
    state: Shared,
    entries: Vec<OutboxEntry>,
    updates: Vec<OutboxUpdate>,
}

impl Drop for MemoryOutboxBatch {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            for entry in &self.entries {
                state.claimed_outbox.remove(&entry.id);
            }
        }
    }
}

#[async_trait]
impl OutboxBatch for MemoryOutboxBatch {
    fn entries(&self) -> &[OutboxEntry] {
        &self.entries
    }

    async fn mark_published(&mut self, id: i64, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.updates.push(OutboxUpdate::Published(id, at));
        Ok(())
    }

    async fn record_failure(
        &mut self,
        id: i64,
        error: &str,
        dead_letter: bool,
    ) -> Result<(), DomainError> {
        self.updates
            .push(OutboxUpdate::Failed(id, error.to_owned(), dead_letter));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        let mut batch = self;
        let updates = std::mem::take(&mut batch.updates);
        let mut state = batch.state.lock().unwrap();
        for update in updates {
            match update {
                OutboxUpdate::Published(id, at) => {
                    if let Some(entry) = state.outbox.iter_mut().find(|e| e.id == id) {
                        entry.published = true;
                        entry.published_at = Some(at);
                    }
                }
                OutboxUpdate::Failed(id, error, dead_letter) => {
                    if let Some(entry) = state.outbox.iter_mut().find(|e| e.id == id) {
                        entry.retry_count += 1;
                        entry.last_error = Some(error);
                        entry.dead_lettered = dead_letter;
                    }
                }
            }
        }
        drop(state);
        Ok(())
    }
}

/// Outbox rows held in memory.
#[derive(Clone)]
pub struct InMemoryOutboxStore {
    state: Shared,
}

impl InMemoryOutboxStore {
    /// Every outbox entry, in creation order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn entries(&self) -> Vec<OutboxEntry> {
        self.state.lock().unwrap().outbox.clone()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn claim_unpublished(&self, limit: i64) -> Result<Box<dyn OutboxBatch>, DomainError> {
        let mut state = self.state.lock().unwrap();
        let mut entries: Vec<OutboxEntry> = state
            .outbox
            .iter()
            .filter(|e| !e.published && !e.dead_lettered && !state.claimed_outbox.contains(&e.id))
            .cloned()
            .collect();
        entries.sort_by(|a, b| (&a.aggregate_id, a.id).cmp(&(&b.aggregate_id, b.id)));
        entries.truncate(to_usize(limit));
        for entry in &entries {
            state.claimed_outbox.insert(entry.id);
        }
        Ok(Box::new(MemoryOutboxBatch {
            state: Arc::clone(&self.state),
            entries,
            updates: Vec::new(),
        }))
    }

    async fn fetch_by_aggregate(
        &self,
        aggregate_id: &StreamId,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, DomainError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .outbox
            .iter()
            .filter(|e| &e.aggregate_id == aggregate_id)
            .take(to_usize(limit))
            .cloned()
            .collect())
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<OutboxEntry>, DomainError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .outbox
            .iter()
            .filter(|e| e.dead_lettered)
            .take(to_usize(limit))
            .cloned()
            .collect())
    }

    async fn requeue(&self, id: i64) -> Result<bool, DomainError> {
        let mut state = self.state.lock().unwrap();
        match state
            .outbox
            .iter_mut()
            .find(|e| e.id == id && e.dead_lettered)
        {
            Some(entry) => {
                entry.dead_lettered = false;
                entry.retry_count = 0;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn purge_published(&self, older_than: DateTime<Utc>) -> Result<u64, DomainError> {
        let mut state = self.state.lock().unwrap();
        let before = state.outbox.len();
        state
            .outbox
            .retain(|e| !(e.published && e.published_at.is_some_and(|at| at < older_than)));
        Ok(u64::try_from(before - state.outbox.len()).unwrap_or(u64::MAX))
    }

    async fn stats(&self) -> Result<OutboxStats, DomainError> {
        let state = self.state.lock().unwrap();
        let mut stats = OutboxStats::default();
        for entry in &state.outbox {
            stats.total += 1;
            if entry.published {
                stats.published += 1;
            } else if entry.dead_lettered {
                stats.dead_lettered += 1;
            } else {
                stats.pending += 1;
            }
            if !entry.published {
                stats.max_retry_count = stats.max_retry_count.max(entry.retry_count);
            }
        }
        Ok(stats)
    }
}

/// Snapshots held in memory, one per stream.
#[derive(Debug, Default, Clone)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<Mutex<HashMap<StreamId, Snapshot>>>,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.stream_id.clone(), snapshot);
        Ok(())
    }

    async fn find(&self, stream_id: &StreamId) -> Result<Option<Snapshot>, DomainError> {
        Ok(self.snapshots.lock().unwrap().get(stream_id).cloned())
    }

    async fn delete(&self, stream_id: &StreamId) -> Result<(), DomainError> {
        self.snapshots.lock().unwrap().remove(stream_id);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Snapshot>, DomainError> {
        let mut all: Vec<Snapshot> = self.snapshots.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, DomainError> {
        let mut snapshots = self.snapshots.lock().unwrap();
        let before = snapshots.len();
        snapshots.retain(|_, s| s.created_at >= older_than);
        Ok(u64::try_from(before - snapshots.len()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use strata_core::event::NewEvent;

    use super::*;

    fn event(kind: &str) -> NewEvent {
        NewEvent::new(kind, serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_stale_append_is_rejected_without_writing() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("Order-1");
        store.append(&stream, event("Placed"), 0).await.unwrap();

        let result = store.append(&stream, event("Placed"), 0).await;

        assert!(result.unwrap_err().is_concurrency_conflict());
        assert_eq!(store.events().len(), 1);
    }

    #[tokio::test]
    async fn test_claimed_events_are_skipped_until_released() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("Order-1");
        store
            .append_batch(&stream, vec![event("A"), event("B"), event("C")], 0)
            .await
            .unwrap();
        let checkpoints = store.checkpoints();

        let first = checkpoints.claim_batch(0, 2).await.unwrap();
        let second = checkpoints.claim_batch(0, 10).await.unwrap();

        assert_eq!(first.events().iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(second.events().iter().map(|e| e.id).collect::<Vec<_>>(), vec![3]);

        first.release().await.unwrap();
        second.release().await.unwrap();
        let third = checkpoints.claim_batch(0, 10).await.unwrap();
        assert_eq!(third.events().len(), 3);
    }

    #[tokio::test]
    async fn test_advance_never_moves_backwards() {
        let checkpoints = InMemoryEventStore::new().checkpoints();
        let now = Utc::now();

        checkpoints.advance("p", 10, now).await.unwrap();
        checkpoints.advance("p", 4, now).await.unwrap();

        assert_eq!(checkpoints.position("p").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_uncommitted_outbox_batch_changes_nothing() {
        let store = InMemoryEventStore::new();
        store
            .append_batch_with(&StreamId::new("Order-1"), vec![event("Placed")], 0, OutboxPolicy::Enqueue)
            .await
            .unwrap();
        let outbox = store.outbox();

        let mut batch = outbox.claim_unpublished(10).await.unwrap();
        batch.mark_published(1, Utc::now()).await.unwrap();
        drop(batch);

        let entries = outbox.entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].published);
        assert_eq!(outbox.claim_unpublished(10).await.unwrap().entries().len(), 1);
    }
}
