//! Strata Core — the event-sourced persistence engine.
//!
//! This crate defines the event record, the storage ports (event store,
//! snapshots, projection checkpoints, outbox) and the engine logic driven
//! through them: aggregate replay, the repository, the projection manager
//! and the outbox relay. It contains no infrastructure code; adapters live
//! in `strata-event-store` (`PostgreSQL`) and `strata-test-support`
//! (in-memory).

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod event;
pub mod outbox;
pub mod projection;
pub mod repository;
pub mod snapshot;
pub mod store;
pub mod worker;
