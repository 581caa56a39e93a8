//! Operator HTTP surface.

pub mod dead_letters;
pub mod health;
pub mod projections;
pub mod status;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the full router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(status::router())
        .nest("/dead-letters", dead_letters::router())
        .nest("/projections", projections::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
