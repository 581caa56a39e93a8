//! Aggregate root abstraction and the replay protocol.

use crate::error::DomainError;
use crate::event::{DomainEvent, StreamId};

/// Version bookkeeping and not-yet-persisted events carried by an aggregate.
#[derive(Debug)]
pub struct Changes<E> {
    version: i64,
    pending: Vec<E>,
}

impl<E> Changes<E> {
    /// The persisted stream version this aggregate was folded up to.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Events recorded since the last load or commit, in order.
    #[must_use]
    pub fn pending(&self) -> &[E] {
        &self.pending
    }

    /// Clears pending events and advances the version by their count.
    /// Returns the new version.
    #[allow(clippy::cast_possible_wrap)]
    pub(crate) fn mark_committed(&mut self) -> i64 {
        self.version += self.pending.len() as i64;
        self.pending.clear();
        self.version
    }

    pub(crate) fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

impl<E> Default for Changes<E> {
    fn default() -> Self {
        Self {
            version: 0,
            pending: Vec::new(),
        }
    }
}

/// Trait for aggregate roots that reconstitute from event history.
///
/// Implementors supply a pure, exhaustive [`apply`](AggregateRoot::apply) fold
/// and storage for their [`Changes`]; the replay and recording operations are
/// provided.
pub trait AggregateRoot: Send + Sync + Sized {
    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Aggregate type name, used as the stream prefix.
    const KIND: &'static str;

    /// Creates a blank aggregate at version 0.
    fn new(stream_id: StreamId) -> Self;

    /// Returns the owning stream.
    fn stream_id(&self) -> &StreamId;

    /// Folds one event into state. Must be pure and side-effect free.
    fn apply(&mut self, event: &Self::Event);

    /// Returns the version bookkeeping.
    fn changes(&self) -> &Changes<Self::Event>;

    /// Returns the version bookkeeping mutably.
    fn changes_mut(&mut self) -> &mut Changes<Self::Event>;

    /// Serializes folded state for a snapshot. `None` opts out of snapshots.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the state cannot be encoded.
    fn snapshot_state(&self) -> Result<Option<serde_json::Value>, DomainError> {
        Ok(None)
    }

    /// Restores folded state from a snapshot payload. The version is set by
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be decoded or the aggregate
    /// does not support snapshots.
    fn restore_snapshot(&mut self, _state: serde_json::Value) -> Result<(), DomainError> {
        Err(DomainError::Validation(format!(
            "{} does not support snapshots",
            Self::KIND
        )))
    }

    /// Returns the persisted version.
    fn version(&self) -> i64 {
        self.changes().version()
    }

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Self::Event] {
        self.changes().pending()
    }

    /// Returns the version the next recorded event will receive.
    #[allow(clippy::cast_possible_wrap)]
    fn next_version(&self) -> i64 {
        self.version() + self.uncommitted_events().len() as i64 + 1
    }

    /// Applies a newly produced event and queues it for persistence.
    /// Used by command methods only, never during replay.
    fn record(&mut self, event: Self::Event) {
        self.apply(&event);
        self.changes_mut().pending.push(event);
    }

    /// Replays persisted events in order, advancing the version once per
    /// event without queueing them.
    fn load_from_history<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = Self::Event>,
    {
        for event in events {
            self.apply(&event);
            self.changes_mut().version += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventRegistry;

    #[derive(Debug, Clone, PartialEq)]
    enum CounterEvent {
        Incremented(i64),
        Reset,
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                Self::Incremented(_) => "Incremented",
                Self::Reset => "Reset",
            }
        }

        fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
            Ok(match self {
                Self::Incremented(by) => serde_json::json!({ "by": by }),
                Self::Reset => serde_json::json!({}),
            })
        }

        fn registry() -> EventRegistry<Self> {
            EventRegistry::new()
        }
    }

    #[derive(Debug)]
    struct Counter {
        id: StreamId,
        total: i64,
        changes: Changes<CounterEvent>,
    }

    impl AggregateRoot for Counter {
        type Event = CounterEvent;
        const KIND: &'static str = "Counter";

        fn new(stream_id: StreamId) -> Self {
            Self {
                id: stream_id,
                total: 0,
                changes: Changes::default(),
            }
        }

        fn stream_id(&self) -> &StreamId {
            &self.id
        }

        fn apply(&mut self, event: &CounterEvent) {
            match event {
                CounterEvent::Incremented(by) => self.total += by,
                CounterEvent::Reset => self.total = 0,
            }
        }

        fn changes(&self) -> &Changes<CounterEvent> {
            &self.changes
        }

        fn changes_mut(&mut self) -> &mut Changes<CounterEvent> {
            &mut self.changes
        }
    }

    #[test]
    fn test_record_applies_and_queues_without_advancing_version() {
        // Arrange
        let mut counter = Counter::new(StreamId::new("Counter-1"));

        // Act
        counter.record(CounterEvent::Incremented(5));
        counter.record(CounterEvent::Incremented(2));

        // Assert
        assert_eq!(counter.total, 7);
        assert_eq!(counter.version(), 0);
        assert_eq!(counter.uncommitted_events().len(), 2);
        assert_eq!(counter.next_version(), 3);
    }

    #[test]
    fn test_load_from_history_advances_version_without_queueing() {
        // Arrange
        let mut counter = Counter::new(StreamId::new("Counter-1"));

        // Act
        counter.load_from_history(vec![
            CounterEvent::Incremented(3),
            CounterEvent::Reset,
            CounterEvent::Incremented(4),
        ]);

        // Assert
        assert_eq!(counter.total, 4);
        assert_eq!(counter.version(), 3);
        assert!(counter.uncommitted_events().is_empty());
    }

    #[test]
    fn test_mark_committed_advances_by_pending_count() {
        let mut counter = Counter::new(StreamId::new("Counter-1"));
        counter.load_from_history(vec![CounterEvent::Incremented(1)]);
        counter.record(CounterEvent::Incremented(1));
        counter.record(CounterEvent::Incremented(1));

        let version = counter.changes_mut().mark_committed();

        assert_eq!(version, 3);
        assert_eq!(counter.version(), 3);
        assert!(counter.uncommitted_events().is_empty());
    }

    #[test]
    fn test_replay_is_deterministic() {
        let history = vec![
            CounterEvent::Incremented(10),
            CounterEvent::Incremented(-3),
            CounterEvent::Reset,
            CounterEvent::Incremented(8),
        ];
        let mut a = Counter::new(StreamId::new("Counter-1"));
        let mut b = Counter::new(StreamId::new("Counter-1"));

        a.load_from_history(history.clone());
        b.load_from_history(history);

        assert_eq!(a.total, b.total);
        assert_eq!(a.version(), b.version());
    }

    #[test]
    fn test_snapshots_are_opt_in() {
        let mut counter = Counter::new(StreamId::new("Counter-1"));
        assert!(counter.snapshot_state().unwrap().is_none());
        assert!(counter.restore_snapshot(serde_json::json!({})).is_err());
    }
}
