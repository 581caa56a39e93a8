//! Orders bounded context.
//!
//! A small order lifecycle built on the Strata engine: commands go through a
//! [`Repository`](strata_core::repository::Repository) with outbox staging,
//! and [`OrderSummaryProjector`](application::projections::OrderSummaryProjector)
//! keeps a denormalized read model current.

pub mod application;
pub mod domain;
