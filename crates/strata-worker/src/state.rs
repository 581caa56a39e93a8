//! Shared application state.

use std::sync::Arc;

use crate::services::Services;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The process's engine components.
    pub services: Arc<Services>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}
