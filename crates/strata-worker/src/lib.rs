//! Strata worker library.
//!
//! Re-exports modules for integration testing.

pub mod config;
pub mod error;
pub mod publisher;
pub mod routes;
pub mod services;
pub mod state;
pub mod summary_store;
