//! Aggregate repository: load by replay, save under optimistic concurrency.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::aggregate::AggregateRoot;
use crate::clock::{Clock, SystemClock};
use crate::error::DomainError;
use crate::event::{DomainEvent, EventMetadata, EventRecord, EventRegistry, NewEvent, StreamId};
use crate::snapshot::{Snapshot, SnapshotPolicy, SnapshotStore};
use crate::store::{EventStore, OutboxPolicy};

/// Loads and persists one aggregate type through an [`EventStore`].
///
/// Snapshots and outbox staging are opt-in via [`Repository::with_snapshots`]
/// and [`Repository::with_outbox`].
pub struct Repository<A: AggregateRoot> {
    store: Arc<dyn EventStore>,
    snapshots: Option<(Arc<dyn SnapshotStore>, SnapshotPolicy)>,
    clock: Arc<dyn Clock>,
    registry: EventRegistry<A::Event>,
    outbox: OutboxPolicy,
}

impl<A: AggregateRoot> Repository<A> {
    /// Creates a repository without snapshots or outbox staging.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            snapshots: None,
            clock: Arc::new(SystemClock),
            registry: A::Event::registry(),
            outbox: OutboxPolicy::Skip,
        }
    }

    /// Shortcuts replay through `snapshots`, writing a fresh one whenever a
    /// save crosses a `policy` boundary.
    #[must_use]
    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotStore>, policy: SnapshotPolicy) -> Self {
        self.snapshots = Some((snapshots, policy));
        self
    }

    /// Stages every saved event in the outbox, atomically with the append.
    #[must_use]
    pub fn with_outbox(mut self) -> Self {
        self.outbox = OutboxPolicy::Enqueue;
        self
    }

    /// Uses `clock` for snapshot timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns `true` if the stream has persisted events.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn exists(&self, stream_id: &StreamId) -> Result<bool, DomainError> {
        self.store.stream_exists(stream_id).await
    }

    /// Loads an aggregate whose version equals the persisted stream version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if the stream has no events,
    /// `DomainError::UnknownEventType` if a stored type has no decoder, and
    /// `DomainError::NonContiguousStream` if versions skip.
    #[instrument(skip_all, fields(kind = A::KIND, stream_id = %stream_id))]
    pub async fn load(&self, stream_id: &StreamId) -> Result<A, DomainError> {
        self.rehydrate(stream_id)
            .await?
            .ok_or_else(|| DomainError::AggregateNotFound(stream_id.clone()))
    }

    /// Loads an aggregate, or returns a blank one at version 0 when the
    /// stream does not exist yet.
    ///
    /// # Errors
    ///
    /// As [`Repository::load`], except that a missing stream is not an error.
    #[instrument(skip_all, fields(kind = A::KIND, stream_id = %stream_id))]
    pub async fn load_or_new(&self, stream_id: &StreamId) -> Result<A, DomainError> {
        Ok(self
            .rehydrate(stream_id)
            .await?
            .unwrap_or_else(|| A::new(stream_id.clone())))
    }

    /// Appends the aggregate's pending events at its tracked version, then
    /// clears them and advances the version. No-op when nothing is pending.
    ///
    /// # Errors
    ///
    /// Propagates `DomainError::ConcurrencyConflict` unchanged; the aggregate
    /// keeps its pending events in that case.
    #[instrument(
        skip(self, aggregate, metadata),
        fields(kind = A::KIND, stream_id = %aggregate.stream_id(), version = aggregate.version())
    )]
    pub async fn save(
        &self,
        aggregate: &mut A,
        metadata: &EventMetadata,
    ) -> Result<Vec<EventRecord>, DomainError> {
        if aggregate.uncommitted_events().is_empty() {
            return Ok(Vec::new());
        }

        let events = aggregate
            .uncommitted_events()
            .iter()
            .map(|event| NewEvent::from_domain(event, metadata.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let previous = aggregate.version();
        let records = self
            .store
            .append_batch_with(aggregate.stream_id(), events, previous, self.outbox)
            .await
            .inspect_err(|e| {
                if e.is_concurrency_conflict() {
                    warn!(error = %e, "save rejected by optimistic concurrency check");
                }
            })?;

        let current = aggregate.changes_mut().mark_committed();
        debug!(appended = records.len(), version = current, "aggregate saved");

        self.snapshot_if_due(aggregate, previous, current).await;
        Ok(records)
    }

    /// Load-or-create, mutate, save: the unit of work for one command.
    ///
    /// # Errors
    ///
    /// Returns whatever `mutate` returns (nothing is saved in that case),
    /// otherwise as [`Repository::load_or_new`] and [`Repository::save`].
    pub async fn with_aggregate<F>(
        &self,
        stream_id: &StreamId,
        metadata: &EventMetadata,
        mutate: F,
    ) -> Result<A, DomainError>
    where
        F: FnOnce(&mut A) -> Result<(), DomainError> + Send,
    {
        let mut aggregate = self.load_or_new(stream_id).await?;
        mutate(&mut aggregate)?;
        self.save(&mut aggregate, metadata).await?;
        Ok(aggregate)
    }

    /// As [`Repository::with_aggregate`], but on a concurrency conflict
    /// reloads and reapplies `mutate`, up to `max_attempts` attempts in total.
    ///
    /// # Errors
    ///
    /// Returns the last `ConcurrencyConflict` once attempts are exhausted.
    pub async fn with_aggregate_retrying<F>(
        &self,
        stream_id: &StreamId,
        metadata: &EventMetadata,
        max_attempts: u32,
        mut mutate: F,
    ) -> Result<A, DomainError>
    where
        F: FnMut(&mut A) -> Result<(), DomainError> + Send,
    {
        let mut attempt = 1;
        loop {
            let mut aggregate = self.load_or_new(stream_id).await?;
            mutate(&mut aggregate)?;
            match self.save(&mut aggregate, metadata).await {
                Ok(_) => return Ok(aggregate),
                Err(e) if e.is_concurrency_conflict() && attempt < max_attempts => {
                    debug!(attempt, stream_id = %stream_id, "retrying command after conflict");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn rehydrate(&self, stream_id: &StreamId) -> Result<Option<A>, DomainError> {
        let mut aggregate = self.restore_from_snapshot(stream_id).await;
        let from_snapshot = aggregate.version() > 0;

        let records = self.store.read_stream(stream_id, aggregate.version()).await?;

        if from_snapshot && records.is_empty() {
            let actual = self.store.stream_version(stream_id).await?;
            if actual < aggregate.version() {
                warn!(
                    snapshot_version = aggregate.version(),
                    stream_version = actual,
                    "snapshot is ahead of its stream, replaying from scratch"
                );
                aggregate = A::new(stream_id.clone());
                let records = self.store.read_stream(stream_id, 0).await?;
                if records.is_empty() {
                    return Ok(None);
                }
                self.replay(&mut aggregate, &records)?;
                return Ok(Some(aggregate));
            }
        }

        if records.is_empty() && !from_snapshot {
            return Ok(None);
        }

        self.replay(&mut aggregate, &records)?;
        Ok(Some(aggregate))
    }

    /// Returns a blank aggregate, or one restored from a usable snapshot.
    async fn restore_from_snapshot(&self, stream_id: &StreamId) -> A {
        let mut aggregate = A::new(stream_id.clone());
        let Some((snapshots, _)) = &self.snapshots else {
            return aggregate;
        };

        match snapshots.find(stream_id).await {
            Ok(Some(snapshot)) if snapshot.version > 0 => {
                match aggregate.restore_snapshot(snapshot.state) {
                    Ok(()) => {
                        aggregate.changes_mut().set_version(snapshot.version);
                        debug!(snapshot_version = snapshot.version, "restored from snapshot");
                        aggregate
                    }
                    Err(e) => {
                        warn!(error = %e, "unreadable snapshot, replaying full stream");
                        A::new(stream_id.clone())
                    }
                }
            }
            Ok(_) => aggregate,
            Err(e) => {
                warn!(error = %e, "snapshot lookup failed, replaying full stream");
                aggregate
            }
        }
    }

    /// Decodes every record before folding any, so an unknown type or a
    /// version gap halts replay without leaving partial state.
    fn replay(&self, aggregate: &mut A, records: &[EventRecord]) -> Result<(), DomainError> {
        let mut expected = aggregate.version() + 1;
        let mut events = Vec::with_capacity(records.len());
        for record in records {
            if record.version != expected {
                return Err(DomainError::NonContiguousStream {
                    stream_id: record.stream_id.clone(),
                    expected,
                    found: record.version,
                });
            }
            events.push(self.registry.decode_record(record)?);
            expected += 1;
        }
        aggregate.load_from_history(events);
        Ok(())
    }

    async fn snapshot_if_due(&self, aggregate: &A, previous: i64, current: i64) {
        let Some((snapshots, policy)) = &self.snapshots else {
            return;
        };
        if !policy.crossed_boundary(previous, current) {
            return;
        }

        let state = match aggregate.snapshot_state() {
            Ok(Some(state)) => state,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to serialize snapshot state");
                return;
            }
        };

        let snapshot = Snapshot {
            stream_id: aggregate.stream_id().clone(),
            version: current,
            state,
            created_at: self.clock.now(),
        };
        if let Err(e) = snapshots.save(snapshot).await {
            warn!(error = %e, version = current, "failed to write snapshot");
        } else {
            debug!(version = current, "snapshot written");
        }
    }
}
