//! Snapshot store port and snapshot cadence policy.
//!
//! A snapshot is a cached fold of one aggregate at a stream version. It only
//! shortens replay; the event log stays the source of truth, so a missing or
//! unreadable snapshot is never a correctness problem.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::event::StreamId;

/// Point-in-time serialization of an aggregate's folded state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The stream this snapshot shortcuts.
    pub stream_id: StreamId,
    /// The stream version the state was folded up to.
    pub version: i64,
    /// Opaque serialized state.
    pub state: serde_json::Value,
    /// When the snapshot was written.
    pub created_at: DateTime<Utc>,
}

/// Keyed snapshot storage; at most one live snapshot per stream.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Upserts the stream's snapshot (last write wins).
    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError>;

    /// Returns the stream's snapshot, if any.
    async fn find(&self, stream_id: &StreamId) -> Result<Option<Snapshot>, DomainError>;

    /// Removes the stream's snapshot.
    async fn delete(&self, stream_id: &StreamId) -> Result<(), DomainError>;

    /// Returns every snapshot, newest first.
    async fn all(&self) -> Result<Vec<Snapshot>, DomainError>;

    /// Deletes snapshots written before `older_than`; returns how many.
    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, DomainError>;
}

/// Default number of events between snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: i64 = 50;

/// Snapshot every N events. Bounds worst-case replay after a snapshot to N.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    interval: i64,
}

impl SnapshotPolicy {
    /// A policy snapshotting every `interval` events. Zero or negative
    /// disables snapshotting.
    #[must_use]
    pub const fn every(interval: i64) -> Self {
        Self { interval }
    }

    /// The configured interval.
    #[must_use]
    pub const fn interval(&self) -> i64 {
        self.interval
    }

    /// `true` when `version` is a positive multiple of the interval.
    #[must_use]
    pub const fn should_snapshot(&self, version: i64) -> bool {
        self.interval > 0 && version > 0 && version % self.interval == 0
    }

    /// `true` when an append moving the stream from `previous` to `current`
    /// passed a version for which [`Self::should_snapshot`] holds. A batch
    /// append can jump over the boundary without landing on it.
    #[must_use]
    pub const fn crossed_boundary(&self, previous: i64, current: i64) -> bool {
        if self.interval <= 0 || current <= previous {
            return false;
        }
        let boundary = current - current % self.interval;
        boundary > previous && self.should_snapshot(boundary)
    }
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self::every(DEFAULT_SNAPSHOT_INTERVAL)
    }
}
