//! Engine error types.

use thiserror::Error;

use crate::event::StreamId;

/// Write-path error type, surfaced synchronously to command callers.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The stream has no events (and no snapshot) where presence was required.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(StreamId),

    /// Optimistic concurrency conflict. Reload and retry.
    #[error("concurrency conflict on stream {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream_id: StreamId,
        /// The version the caller last observed.
        expected: i64,
        /// The version found at commit time.
        actual: i64,
    },

    /// A stored event type has no registered decoder.
    #[error("unknown event type: {event_type}")]
    UnknownEventType {
        /// The unmapped discriminator.
        event_type: String,
    },

    /// A replayed stream skipped or reordered a version.
    #[error("stream {stream_id} is not contiguous: expected version {expected}, found {found}")]
    NonContiguousStream {
        /// The stream being replayed.
        stream_id: StreamId,
        /// The version the aggregate expected next.
        expected: i64,
        /// The version actually read.
        found: i64,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An event payload or snapshot could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` for errors the caller resolves by reloading and retrying.
    #[must_use]
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
