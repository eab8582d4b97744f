use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::attempt_dto::{
    AttemptDetailResponse, AttemptSummary, SaveAnswerRequest, SaveAnswerResponse,
    StartAttemptResponse, SubmitAttemptRequest, SubmitAttemptResponse, TabSwitchRequest,
    TabSwitchResponse,
};
use crate::error::Result;
use crate::middleware::auth::Claims;
use crate::AppState;

#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
) -> Result<Response> {
    let student_id = claims.student_id()?;
    let started = state.attempt_service.start_attempt(student_id, quiz_id).await?;
    let body = StartAttemptResponse::new(started, state.attempt_service.now());
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

#[axum::debug_handler]
pub async fn list_attempts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
) -> Result<Response> {
    let student_id = claims.student_id()?;
    let attempts = state.attempt_service.list_attempts(student_id, quiz_id).await?;
    let body: Vec<AttemptSummary> = attempts.iter().map(AttemptSummary::from).collect();
    Ok(Json(body).into_response())
}

#[axum::debug_handler]
pub async fn get_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Response> {
    let student_id = claims.student_id()?;
    let (status, attempt) = state
        .attempt_service
        .attempt_detail(student_id, attempt_id)
        .await?;
    Ok(Json(AttemptDetailResponse::new(status, &attempt)).into_response())
}

#[axum::debug_handler]
pub async fn save_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<SaveAnswerRequest>,
) -> Result<Response> {
    req.validate()?;
    let student_id = claims.student_id()?;
    let question_id = req.question_id;
    let timestamp = state
        .attempt_service
        .record_answer(student_id, attempt_id, question_id, req.answer)
        .await?;
    Ok(Json(SaveAnswerResponse {
        saved: true,
        question_id,
        timestamp,
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn record_tab_switch(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<TabSwitchRequest>,
) -> Result<Response> {
    req.validate()?;
    let student_id = claims.student_id()?;
    let tab_switches = state
        .attempt_service
        .record_tab_switch(student_id, attempt_id, &req.kind)
        .await?;
    Ok(Json(TabSwitchResponse { tab_switches }).into_response())
}

#[axum::debug_handler]
pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<SubmitAttemptRequest>,
) -> Result<Response> {
    let student_id = claims.student_id()?;
    let reason = req.reason()?;
    let outcome = state
        .attempt_service
        .submit(student_id, attempt_id, reason)
        .await?;
    Ok(Json(SubmitAttemptResponse {
        attempt_id: outcome.attempt.id,
        status: outcome.attempt.status,
        result: outcome.result,
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn get_result(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Response> {
    let student_id = claims.student_id()?;
    let result = state
        .attempt_service
        .result_for_student(student_id, attempt_id)
        .await?;
    Ok(Json(result).into_response())
}
