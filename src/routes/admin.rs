use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json, Response},
    Extension,
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::dto::attempt_dto::{AttemptSummary, SubmitAttemptResponse, VoidAttemptRequest};
use crate::error::Result;
use crate::middleware::auth::Claims;
use crate::AppState;

#[axum::debug_handler]
pub async fn void_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<VoidAttemptRequest>,
) -> Result<Response> {
    req.validate()?;
    let voided = state
        .attempt_service
        .void_attempt(attempt_id, req.reason.trim(), claims.actor_id())
        .await?;
    Ok(Json(json!({
        "attempt": AttemptSummary::from(&voided),
        "voided_at": voided.voided_at,
        "reason": voided.void_reason,
    }))
    .into_response())
}

/// Re-runs scoring for an attempt stuck in `submitted`.
#[axum::debug_handler]
pub async fn retry_evaluation(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Response> {
    let outcome = state.attempt_service.retry_evaluation(attempt_id).await?;
    Ok(Json(SubmitAttemptResponse {
        attempt_id: outcome.attempt.id,
        status: outcome.attempt.status,
        result: outcome.result,
    })
    .into_response())
}
