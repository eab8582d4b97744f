use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::error::{Error, Result};
use crate::models::answer::Answer;
use crate::models::attempt::{Attempt, AttemptStatus, PresentedQuestion, SubmitReason};
use crate::models::result::QuizResult;
use crate::services::attempt_service::{AttemptStatusView, StartedAttempt};

const MAX_TEXT_ANSWER_CHARS: usize = 10_000;
const MAX_SELECTED_OPTIONS: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAttemptResponse {
    pub attempt_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub time_remaining_seconds: i64,
    pub questions: Vec<PresentedQuestion>,
}

impl StartAttemptResponse {
    pub fn new(started: StartedAttempt, now: DateTime<Utc>) -> Self {
        let attempt = started.attempt;
        Self {
            attempt_id: attempt.id,
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            time_remaining_seconds: attempt.time_remaining_seconds(now),
            title: attempt.snapshot.title,
            started_at: attempt.started_at,
            deadline_at: attempt.deadline_at,
            questions: started.questions,
        }
    }
}

/// Attempt as listed to its owner. Carries no answer key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub submit_reason: Option<SubmitReason>,
    pub total_score: Option<Decimal>,
    pub percentage: Option<Decimal>,
}

impl From<&Attempt> for AttemptSummary {
    fn from(a: &Attempt) -> Self {
        let evaluated = a.status == AttemptStatus::Evaluated;
        Self {
            id: a.id,
            quiz_id: a.quiz_id,
            attempt_number: a.attempt_number,
            status: a.status,
            started_at: a.started_at,
            deadline_at: a.deadline_at,
            submitted_at: a.submitted_at,
            submit_reason: a.submit_reason,
            total_score: evaluated.then_some(a.total_score),
            percentage: evaluated.then_some(a.percentage),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptDetailResponse {
    #[serde(flatten)]
    pub status: AttemptStatusView,
    /// Only present while the attempt can still be answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<PresentedQuestion>>,
    pub answers: BTreeMap<Uuid, Answer>,
}

impl AttemptDetailResponse {
    pub fn new(status: AttemptStatusView, attempt: &Attempt) -> Self {
        Self {
            status,
            questions: attempt
                .is_in_progress()
                .then(|| attempt.presented_questions()),
            answers: attempt.answer_values(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    pub question_id: Uuid,
    #[validate(custom(function = "validate_answer"))]
    pub answer: Answer,
}

/// Size limits only. Whether the shape fits the question is decided when
/// grading.
fn validate_answer(answer: &Answer) -> std::result::Result<(), ValidationError> {
    match answer {
        Answer::Text { text } if text.chars().count() > MAX_TEXT_ANSWER_CHARS => {
            Err(ValidationError::new("answer_too_long"))
        }
        Answer::MultiChoice { option_ids } if option_ids.len() > MAX_SELECTED_OPTIONS => {
            Err(ValidationError::new("too_many_options"))
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAnswerResponse {
    pub saved: bool,
    pub question_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TabSwitchRequest {
    #[validate(length(min = 1, max = 64))]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabSwitchResponse {
    pub tab_switches: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitAttemptRequest {
    pub reason: Option<SubmitReason>,
}

impl SubmitAttemptRequest {
    /// Clients may report a user submission or their own timer running out.
    /// The policy reason is reserved for the server.
    pub fn reason(&self) -> Result<SubmitReason> {
        match self.reason.unwrap_or(SubmitReason::User) {
            SubmitReason::TabSwitchPolicy => Err(Error::BadRequest(
                "reason must be 'user' or 'timeout'".to_string(),
            )),
            reason => Ok(reason),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAttemptResponse {
    pub attempt_id: Uuid,
    pub status: AttemptStatus,
    pub result: QuizResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VoidAttemptRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}
