// Rate limit check endpoints

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::{api::routes::AppState, errors::Result, rate_limit::RateLimitResult};

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub identifier: String,
    /// Policy name, or an endpoint matched against policy `applies_to` tags
    pub policy: String,
}

/// POST /v1/check
///
/// Returns 200 whether the request is admitted or denied; the body carries
/// the verdict. Callers are expected to map a denial to their own
/// rate-limit-exceeded response using `retry_after_seconds`.
#[tracing::instrument(skip(state))]
pub async fn check(
    State(state): State<AppState>,
    Json(request): Json<CheckRequest>,
) -> Result<impl IntoResponse> {
    let result = state
        .evaluator
        .check(&request.identifier, &request.policy)
        .await?;

    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct BatchCheckRequest {
    pub identifier: String,
    pub policies: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchCheckEntry {
    pub policy: String,
    pub result: RateLimitResult,
}

/// POST /v1/check/batch
///
/// Evaluates the policies in request order, stopping at the first denial;
/// the response contains exactly the evaluated policies.
#[tracing::instrument(skip(state))]
pub async fn check_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchCheckRequest>,
) -> Result<impl IntoResponse> {
    let names: Vec<&str> = request.policies.iter().map(String::as_str).collect();
    let results = state
        .evaluator
        .check_multiple(&request.identifier, &names)
        .await?;

    let entries: Vec<BatchCheckEntry> = results
        .into_iter()
        .map(|(policy, result)| BatchCheckEntry { policy, result })
        .collect();

    Ok(Json(entries))
}
