//! Engine status: projection checkpoints and outbox counters.

use std::collections::HashMap;

use axum::extract::State;
use axum::{Json, Router, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use strata_core::outbox::OutboxStats;

use crate::error::ApiError;
use crate::state::AppState;

/// Checkpoint and failure counts for one projector.
#[derive(Debug, Serialize)]
pub struct ProjectorStatus {
    /// Projector name.
    pub name: &'static str,
    /// Highest global event id passed; 0 before the first pass.
    pub last_event_id: i64,
    /// When the position last moved.
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Events that exhausted their retries and need an operator.
    pub exhausted_errors: usize,
}

/// GET /status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// One entry per registered projector, in registration order.
    pub projections: Vec<ProjectorStatus>,
    /// Outbox counters.
    pub outbox: OutboxStats,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let services = &state.services;
    let positions: HashMap<String, _> = services
        .checkpoints
        .positions()
        .await?
        .into_iter()
        .map(|p| (p.projector_name.clone(), p))
        .collect();

    let mut projections = Vec::new();
    for name in services.projections.projector_names() {
        let position = positions.get(name);
        projections.push(ProjectorStatus {
            name,
            last_event_id: position.map_or(0, |p| p.last_event_id),
            last_processed_at: position.and_then(|p| p.last_processed_at),
            exhausted_errors: services.projections.failed(name).await?.len(),
        });
    }

    let outbox = services.outbox.stats().await?;
    Ok(Json(StatusResponse {
        projections,
        outbox,
    }))
}

/// GET /status
pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(status))
}
