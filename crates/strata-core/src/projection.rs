//! Checkpointed projection manager.
//!
//! Consumes the global event log in id order and feeds each registered
//! [`Projector`] independently. Every projector has its own position; a
//! handler failure is recorded per (projector, event) and retried on a
//! backoff schedule by a separate sweep, without blocking other projectors or
//! later events.
//!
//! Handlers receive at-least-once delivery and must be idempotent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::error::DomainError;
use crate::event::EventRecord;
use crate::store::EventStore;
use crate::worker::WorkerHandle;

/// Failure raised by a single projector handler for a single event.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Wraps any displayable error.
    pub fn new(message: impl ToString) -> Self {
        Self(message.to_string())
    }
}

impl From<DomainError> for HandlerError {
    fn from(err: DomainError) -> Self {
        Self(err.to_string())
    }
}

/// A read-model builder driven by the projection manager.
#[async_trait]
pub trait Projector: Send + Sync {
    /// Unique, stable name used as the checkpoint key.
    fn name(&self) -> &'static str;

    /// Event types this projector handles. Empty means every type.
    fn subscribed_types(&self) -> &[&'static str];

    /// Applies one event to the read model. Must tolerate redelivery.
    async fn handle(&self, event: &EventRecord) -> Result<(), HandlerError>;

    /// Discards the read model so it can be rebuilt from position 0.
    async fn reset(&self) -> Result<(), HandlerError>;

    /// Returns `true` if this projector handles `event_type`.
    fn subscribes_to(&self, event_type: &str) -> bool {
        let types = self.subscribed_types();
        types.is_empty() || types.contains(&event_type)
    }
}

/// A projector's checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionPosition {
    /// The projector this row belongs to.
    pub projector_name: String,
    /// Highest global event id the projector has passed.
    pub last_event_id: i64,
    /// When the position last moved.
    pub last_processed_at: Option<DateTime<Utc>>,
}

/// A recorded handler failure awaiting retry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionErrorRecord {
    /// The projector that failed.
    pub projector_name: String,
    /// The global id of the event that failed.
    pub event_id: i64,
    /// The failed event's type.
    pub event_type: String,
    /// Failed attempts so far.
    pub retry_count: i32,
    /// Earliest time the retry sweep may reattempt.
    pub next_retry_at: DateTime<Utc>,
    /// When the latest failure happened.
    pub last_error_at: DateTime<Utc>,
    /// The latest failure message.
    pub error_message: String,
}

/// Events claimed for one pass. Concurrent claimers skip rows held by an
/// unreleased batch.
#[async_trait]
pub trait ClaimedBatch: Send {
    /// The claimed events, ascending by id.
    fn events(&self) -> &[EventRecord];

    /// Releases the claim.
    async fn release(self: Box<Self>) -> Result<(), DomainError>;
}

/// Storage for projector positions and projection errors.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Claims up to `limit` events with `id > after_id`, skipping events
    /// already claimed by another worker.
    async fn claim_batch(
        &self,
        after_id: i64,
        limit: i64,
    ) -> Result<Box<dyn ClaimedBatch>, DomainError>;

    /// Returns the projector's position, 0 if it has none.
    async fn position(&self, projector: &str) -> Result<i64, DomainError>;

    /// Returns every stored position.
    async fn positions(&self) -> Result<Vec<ProjectionPosition>, DomainError>;

    /// Moves the projector's position forward to `event_id`. Never moves it
    /// backwards.
    async fn advance(
        &self,
        projector: &str,
        event_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    /// Deletes the projector's position and its recorded errors.
    async fn reset(&self, projector: &str) -> Result<(), DomainError>;

    /// Inserts or replaces the error row for (projector, event).
    async fn record_error(&self, record: ProjectionErrorRecord) -> Result<(), DomainError>;

    /// Returns the error row for (projector, event), if any.
    async fn find_error(
        &self,
        projector: &str,
        event_id: i64,
    ) -> Result<Option<ProjectionErrorRecord>, DomainError>;

    /// Deletes the error row for (projector, event).
    async fn clear_error(&self, projector: &str, event_id: i64) -> Result<(), DomainError>;

    /// Event ids in `(after_id, up_to_id]` with an error row for `projector`.
    async fn errored_event_ids(
        &self,
        projector: &str,
        after_id: i64,
        up_to_id: i64,
    ) -> Result<Vec<i64>, DomainError>;

    /// Errors due at `now` with fewer than `max_retries` attempts.
    async fn due_errors(
        &self,
        now: DateTime<Utc>,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<ProjectionErrorRecord>, DomainError>;

    /// Errors that exhausted `max_retries` attempts.
    async fn exhausted_errors(
        &self,
        max_retries: i32,
    ) -> Result<Vec<ProjectionErrorRecord>, DomainError>;
}

/// Tuning for the projection manager.
#[derive(Debug, Clone)]
pub struct ProjectionConfig {
    /// Events fetched per pass.
    pub batch_size: i64,
    /// Attempts after which an error is left for manual handling.
    pub max_retries: i32,
    /// Delay before the n-th retry; the last entry caps the schedule.
    pub retry_delays: Vec<TimeDelta>,
}

impl ProjectionConfig {
    /// Delay to wait after `failures_so_far` previous failures.
    #[must_use]
    pub fn retry_delay(&self, failures_so_far: i32) -> TimeDelta {
        let index = usize::try_from(failures_so_far).unwrap_or(0);
        self.retry_delays
            .get(index)
            .or_else(|| self.retry_delays.last())
            .copied()
            .unwrap_or_else(TimeDelta::zero)
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 5,
            retry_delays: vec![
                TimeDelta::minutes(1),
                TimeDelta::minutes(5),
                TimeDelta::minutes(15),
                TimeDelta::hours(1),
                TimeDelta::hours(6),
            ],
        }
    }
}

/// Counters for one projection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Events claimed.
    pub events: usize,
    /// Successful handler invocations.
    pub applied: usize,
    /// Failed handler invocations.
    pub failed: usize,
    /// Whether any projector position moved.
    pub progressed: bool,
}

/// Counters for one retry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Errors resolved by a successful retry.
    pub recovered: usize,
    /// Errors that failed again.
    pub failed: usize,
}

/// Drives registered projectors over the global event log.
pub struct ProjectionManager {
    store: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    projectors: Vec<Arc<dyn Projector>>,
    clock: Arc<dyn Clock>,
    config: ProjectionConfig,
    // Batches and retry sweeps share it; a rebuild holds it exclusively.
    passes: RwLock<()>,
}

impl ProjectionManager {
    /// Creates a manager over `projectors`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if two projectors share a name.
    pub fn new(
        store: Arc<dyn EventStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        projectors: Vec<Arc<dyn Projector>>,
        clock: Arc<dyn Clock>,
        config: ProjectionConfig,
    ) -> Result<Self, DomainError> {
        let mut names = HashSet::new();
        for projector in &projectors {
            if !names.insert(projector.name()) {
                return Err(DomainError::Validation(format!(
                    "duplicate projector name: {}",
                    projector.name()
                )));
            }
        }
        Ok(Self {
            store,
            checkpoints,
            projectors,
            clock,
            config,
            passes: RwLock::new(()),
        })
    }

    /// The manager's configuration.
    #[must_use]
    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    /// Names of the registered projectors.
    #[must_use]
    pub fn projector_names(&self) -> Vec<&'static str> {
        self.projectors.iter().map(|p| p.name()).collect()
    }

    /// Runs passes until the log is drained or a pass makes no progress.
    /// Returns the number of successful handler invocations.
    ///
    /// # Errors
    ///
    /// Propagates checkpoint and store failures; handler failures are
    /// recorded, not returned.
    pub async fn run_until_idle(&self) -> Result<usize, DomainError> {
        let mut applied = 0;
        loop {
            let outcome = self.process_next_batch().await?;
            applied += outcome.applied;
            if outcome.events == 0 || !outcome.progressed {
                return Ok(applied);
            }
        }
    }

    /// Claims the next batch above the slowest projector and applies it.
    ///
    /// # Errors
    ///
    /// Propagates checkpoint and store failures.
    #[instrument(skip_all)]
    pub async fn process_next_batch(&self) -> Result<BatchOutcome, DomainError> {
        if self.projectors.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let _pass = self.passes.read().await;

        let mut persisted: HashMap<&'static str, i64> = HashMap::new();
        for projector in &self.projectors {
            let position = self.checkpoints.position(projector.name()).await?;
            persisted.insert(projector.name(), position);
        }
        let floor = persisted.values().copied().min().unwrap_or(0);
        let start = persisted.clone();

        let batch = self
            .checkpoints
            .claim_batch(floor, self.config.batch_size)
            .await?;
        let events = batch.events().to_vec();
        let mut outcome = BatchOutcome {
            events: events.len(),
            ..BatchOutcome::default()
        };
        let Some(last_id) = events.last().map(|e| e.id) else {
            batch.release().await?;
            return Ok(outcome);
        };

        // Events with an open error row belong to the retry sweep.
        let mut owned_by_retry: HashMap<&'static str, HashSet<i64>> = HashMap::new();
        for projector in &self.projectors {
            let ids = self
                .checkpoints
                .errored_event_ids(projector.name(), floor, last_id)
                .await?;
            owned_by_retry.insert(projector.name(), ids.into_iter().collect());
        }

        let mut local = persisted.clone();
        for event in &events {
            for projector in &self.projectors {
                let name = projector.name();
                let position = local.get(name).copied().unwrap_or(0);
                if event.id <= position {
                    continue;
                }

                let skip = !projector.subscribes_to(&event.event_type)
                    || owned_by_retry
                        .get(name)
                        .is_some_and(|ids| ids.contains(&event.id));
                if skip {
                    local.insert(name, event.id);
                    continue;
                }

                match projector.handle(event).await {
                    Ok(()) => {
                        self.checkpoints
                            .advance(name, event.id, self.clock.now())
                            .await?;
                        local.insert(name, event.id);
                        persisted.insert(name, event.id);
                        outcome.applied += 1;
                    }
                    Err(e) => {
                        outcome.failed += 1;
                        self.record_failure(name, event, &e).await?;
                    }
                }
            }
        }

        for (name, position) in &local {
            if persisted.get(name).is_none_or(|p| position > p) {
                self.checkpoints
                    .advance(name, *position, self.clock.now())
                    .await?;
            }
        }
        outcome.progressed = local.iter().any(|(name, position)| {
            start.get(name).is_none_or(|p| position > p)
        });

        batch.release().await?;

        if outcome.applied > 0 || outcome.failed > 0 {
            info!(
                events = outcome.events,
                applied = outcome.applied,
                failed = outcome.failed,
                "projection batch completed"
            );
        }
        Ok(outcome)
    }

    /// Reattempts errors whose backoff has elapsed and that are below the
    /// retry cap.
    ///
    /// # Errors
    ///
    /// Propagates checkpoint and store failures.
    #[instrument(skip_all)]
    pub async fn retry_failed(&self) -> Result<RetryOutcome, DomainError> {
        let _pass = self.passes.read().await;
        let due = self
            .checkpoints
            .due_errors(
                self.clock.now(),
                self.config.max_retries,
                self.config.batch_size,
            )
            .await?;

        let mut outcome = RetryOutcome::default();
        for record in due {
            let Some(projector) = self.find_projector(&record.projector_name) else {
                warn!(projector = %record.projector_name, "error row for unregistered projector");
                continue;
            };
            let Some(event) = self.store.read_event(record.event_id).await? else {
                warn!(event_id = record.event_id, "error row for missing event, clearing");
                self.checkpoints
                    .clear_error(&record.projector_name, record.event_id)
                    .await?;
                continue;
            };

            match projector.handle(&event).await {
                Ok(()) => {
                    self.checkpoints
                        .clear_error(projector.name(), event.id)
                        .await?;
                    self.checkpoints
                        .advance(projector.name(), event.id, self.clock.now())
                        .await?;
                    outcome.recovered += 1;
                    info!(projector = projector.name(), event_id = event.id, "projection retry succeeded");
                }
                Err(e) => {
                    outcome.failed += 1;
                    self.record_failure(projector.name(), &event, &e).await?;
                }
            }
        }
        Ok(outcome)
    }

    /// Discards a projector's read model and replays the whole log into it.
    /// Returns the number of events applied.
    ///
    /// Waits for in-flight batches and retry sweeps of this manager to finish
    /// and holds new ones off until the replay completes. Other processes
    /// running projectors over the same checkpoints are not paused.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an unknown projector and
    /// `DomainError::Infrastructure` if the reset or any handler fails.
    #[instrument(skip(self))]
    pub async fn rebuild(&self, projector_name: &str) -> Result<usize, DomainError> {
        let projector = self.find_projector(projector_name).ok_or_else(|| {
            DomainError::Validation(format!("unknown projector: {projector_name}"))
        })?;
        let _exclusive = self.passes.write().await;

        projector.reset().await.map_err(|e| {
            DomainError::Infrastructure(format!("failed to reset {projector_name}: {e}"))
        })?;
        self.checkpoints.reset(projector_name).await?;

        let mut after = 0;
        let mut applied = 0;
        loop {
            let page = self.store.read_all(after, self.config.batch_size).await?;
            let Some(last) = page.last().map(|e| e.id) else {
                break;
            };
            for event in &page {
                if projector.subscribes_to(&event.event_type) {
                    projector.handle(event).await.map_err(|e| {
                        DomainError::Infrastructure(format!(
                            "rebuild of {projector_name} failed at event {}: {e}",
                            event.id
                        ))
                    })?;
                    applied += 1;
                }
            }
            self.checkpoints
                .advance(projector_name, last, self.clock.now())
                .await?;
            after = last;
        }

        info!(applied, "projection rebuilt");
        Ok(applied)
    }

    /// Errors for `projector` that exhausted their retries.
    ///
    /// # Errors
    ///
    /// Propagates checkpoint failures.
    pub async fn failed(&self, projector: &str) -> Result<Vec<ProjectionErrorRecord>, DomainError> {
        Ok(self
            .checkpoints
            .exhausted_errors(self.config.max_retries)
            .await?
            .into_iter()
            .filter(|r| r.projector_name == projector)
            .collect())
    }

    /// Spawns the projection sweep, running a drain every `interval`.
    #[must_use]
    pub fn spawn(self: Arc<Self>, interval: Duration) -> WorkerHandle {
        WorkerHandle::spawn("projection-manager", interval, move || {
            let manager = Arc::clone(&self);
            async move {
                if let Err(e) = manager.run_until_idle().await {
                    error!(error = %e, "projection pass failed");
                }
            }
        })
    }

    /// Spawns the retry sweep, running every `interval`.
    #[must_use]
    pub fn spawn_retry_sweep(self: Arc<Self>, interval: Duration) -> WorkerHandle {
        WorkerHandle::spawn("projection-retry", interval, move || {
            let manager = Arc::clone(&self);
            async move {
                match manager.retry_failed().await {
                    Ok(outcome) if outcome.recovered + outcome.failed > 0 => {
                        debug!(?outcome, "retry sweep completed");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "retry sweep failed"),
                }
            }
        })
    }

    fn find_projector(&self, name: &str) -> Option<&Arc<dyn Projector>> {
        self.projectors.iter().find(|p| p.name() == name)
    }

    async fn record_failure(
        &self,
        projector: &str,
        event: &EventRecord,
        err: &HandlerError,
    ) -> Result<(), DomainError> {
        let previous = self
            .checkpoints
            .find_error(projector, event.id)
            .await?
            .map_or(0, |r| r.retry_count);
        let now = self.clock.now();
        let retry_count = previous + 1;

        self.checkpoints
            .record_error(ProjectionErrorRecord {
                projector_name: projector.to_owned(),
                event_id: event.id,
                event_type: event.event_type.clone(),
                retry_count,
                next_retry_at: now + self.config.retry_delay(previous),
                last_error_at: now,
                error_message: err.to_string(),
            })
            .await?;

        if retry_count >= self.config.max_retries {
            error!(
                projector,
                event_id = event.id,
                event_type = %event.event_type,
                retry_count,
                error = %err,
                "projection retries exhausted"
            );
        } else {
            error!(
                projector,
                event_id = event.id,
                event_type = %event.event_type,
                retry_count,
                error = %err,
                "projection handler failed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_follows_schedule_and_caps() {
        let config = ProjectionConfig::default();
        assert_eq!(config.retry_delay(0), TimeDelta::minutes(1));
        assert_eq!(config.retry_delay(1), TimeDelta::minutes(5));
        assert_eq!(config.retry_delay(4), TimeDelta::hours(6));
        assert_eq!(config.retry_delay(9), TimeDelta::hours(6));
    }

    #[test]
    fn test_empty_schedule_retries_immediately() {
        let config = ProjectionConfig {
            retry_delays: Vec::new(),
            ..ProjectionConfig::default()
        };
        assert_eq!(config.retry_delay(3), TimeDelta::zero());
    }
}
