//! In-memory adapters and test doubles for the Strata persistence engine.
//!
//! The in-memory adapters honour the same contracts as the `PostgreSQL` ones
//! (atomic appends, skip-locked claims, monotonic checkpoints), so engine
//! behaviour can be exercised without a database.

mod clock;
mod failing;
mod memory;
mod projector;
mod publisher;

pub use clock::{FixedClock, ManualClock};
pub use failing::{FailingEventStore, FailingSnapshotStore};
pub use memory::{
    InMemoryCheckpointStore, InMemoryEventStore, InMemoryOutboxStore, InMemorySnapshotStore,
};
pub use projector::RecordingProjector;
pub use publisher::{FlakyPublisher, RecordingPublisher};
