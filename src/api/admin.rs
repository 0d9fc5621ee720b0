// Administrative endpoints: reset and statistics

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::{api::routes::AppState, errors::Result};

/// DELETE /v1/limits/:policy/:identifier
///
/// Clears all recorded requests for the key. Idempotent: resetting an
/// already-empty key returns 204 as well.
#[tracing::instrument(skip(state))]
pub async fn reset(
    State(state): State<AppState>,
    Path((policy, identifier)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.evaluator.reset(&identifier, &policy).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/limits/:policy/:identifier/statistics
#[tracing::instrument(skip(state))]
pub async fn statistics(
    State(state): State<AppState>,
    Path((policy, identifier)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let stats = state.reporter.report(&identifier, &policy).await?;
    Ok(Json(stats))
}
