//! Per-projector operations: exhausted failures and rebuilds.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use strata_core::projection::ProjectionErrorRecord;

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

/// POST /projections/{name}/rebuild response.
#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    /// The rebuilt projector.
    pub projector: String,
    /// Events replayed into it.
    pub applied: usize,
}

fn unknown(name: &str) -> Response {
    let body = ErrorBody {
        error: "projector_not_found",
        message: format!("no projector named {name}"),
    };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

async fn failed(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let manager = &state.services.projections;
    if !manager.projector_names().contains(&name.as_str()) {
        return Ok(unknown(&name));
    }
    let errors: Vec<ProjectionErrorRecord> = manager.failed(&name).await?;
    Ok(Json(errors).into_response())
}

/// Blocks until the replay finishes. The worker's own projection loop and
/// retry sweep pause for the duration; another worker process sharing the
/// database keeps running and must be stopped first.
async fn rebuild(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let manager = &state.services.projections;
    if !manager.projector_names().contains(&name.as_str()) {
        return Ok(unknown(&name));
    }
    let applied = manager.rebuild(&name).await?;
    Ok(Json(RebuildResponse {
        projector: name,
        applied,
    })
    .into_response())
}

/// GET /projections/{name}/failed, POST /projections/{name}/rebuild
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{name}/failed", get(failed))
        .route("/{name}/rebuild", post(rebuild))
}
