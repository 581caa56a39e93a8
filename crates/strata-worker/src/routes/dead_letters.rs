//! Dead-lettered outbox entries: listing and requeueing.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use strata_core::outbox::OutboxEntry;
use tracing::info;

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

/// Query string for the listing.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Entries to return, clamped to `1..=1000`.
    pub limit: Option<i64>,
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<OutboxEntry>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let entries = state.services.outbox.dead_letters(limit).await?;
    Ok(Json(entries))
}

async fn requeue(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Response, ApiError> {
    if state.services.outbox.requeue(id).await? {
        info!(entry_id = id, "dead letter requeued");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let body = ErrorBody {
        error: "dead_letter_not_found",
        message: format!("outbox entry {id} is not dead-lettered"),
    };
    Ok((StatusCode::NOT_FOUND, Json(body)).into_response())
}

/// GET /dead-letters, POST /dead-letters/{id}/requeue
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/{id}/requeue", post(requeue))
}
