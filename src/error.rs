use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use uuid::Uuid;

use crate::models::attempt::AttemptStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Quiz is not available: {0}")]
    QuizNotAvailable(String),

    #[error("Attempt limit of {max_attempts} reached")]
    AttemptLimitExceeded { max_attempts: u32 },

    #[error("An attempt for this quiz is already in progress")]
    DuplicateActiveAttempt,

    #[error("Attempt is not in progress")]
    AttemptNotInProgress,

    #[error("Question {0} is not part of this attempt")]
    QuestionNotInAttempt(Uuid),

    #[error("Attempt {0} not found")]
    AttemptNotFound(Uuid),

    #[error("Malformed answer: {0}")]
    MalformedAnswer(String),

    #[error("Result already exists for attempt {0}")]
    ResultAlreadyExists(Uuid),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: AttemptStatus,
        to: AttemptStatus,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Only infrastructure failures are worth retrying; everything else is a
    /// caller error that will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Reqwest(_) | Error::Io(_)
        )
    }

    /// Stable machine-readable code rendered to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Error::QuizNotAvailable(_) => "quiz_not_available",
            Error::AttemptLimitExceeded { .. } => "attempt_limit_exceeded",
            Error::DuplicateActiveAttempt => "duplicate_active_attempt",
            Error::AttemptNotInProgress => "attempt_not_in_progress",
            Error::QuestionNotInAttempt(_) => "question_not_in_attempt",
            Error::AttemptNotFound(_) => "attempt_not_found",
            Error::MalformedAnswer(_) => "malformed_answer",
            Error::ResultAlreadyExists(_) => "result_already_exists",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::BadRequest(_) | Error::Json(_) | Error::Anyhow(_) => "bad_request",
            Error::Validation(_) => "validation_failed",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::Reqwest(_) => "upstream_error",
            _ => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::QuizNotAvailable(_) => StatusCode::FORBIDDEN,
            Error::AttemptLimitExceeded { .. }
            | Error::DuplicateActiveAttempt
            | Error::AttemptNotInProgress
            | Error::ResultAlreadyExists(_)
            | Error::InvalidTransition { .. } => StatusCode::CONFLICT,
            Error::QuestionNotInAttempt(_) | Error::MalformedAnswer(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::AttemptNotFound(_) | Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) | Error::Validation(_) | Error::Json(_) | Error::Anyhow(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Reqwest(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn user_message(&self) -> String {
        match self {
            Error::QuizNotAvailable(reason) => format!("This quiz is not available: {}", reason),
            Error::AttemptLimitExceeded { .. } => {
                "You have already used all your attempts for this quiz".to_string()
            }
            Error::DuplicateActiveAttempt => {
                "You already have an attempt in progress for this quiz".to_string()
            }
            Error::AttemptNotInProgress => "This attempt is no longer active".to_string(),
            Error::QuestionNotInAttempt(_) => {
                "This question is not part of your attempt".to_string()
            }
            Error::AttemptNotFound(_) => "Attempt not found".to_string(),
            Error::Database(_) | Error::Migrate(_) | Error::Io(_) | Error::Internal(_)
            | Error::Config(_) => "An unexpected error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.user_message(),
        }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_errors_have_distinct_codes() {
        let errors = [
            Error::QuizNotAvailable("closed".into()),
            Error::AttemptLimitExceeded { max_attempts: 1 },
            Error::DuplicateActiveAttempt,
            Error::AttemptNotInProgress,
            Error::QuestionNotInAttempt(Uuid::nil()),
            Error::AttemptNotFound(Uuid::nil()),
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(errors.iter().all(|e| !e.is_retryable()));
    }

    #[test]
    fn storage_errors_are_retryable_and_opaque() {
        let err = Error::Database(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "An unexpected error occurred");
    }

    #[test]
    fn catalog_faults_are_not_retryable() {
        let err = Error::Internal("question has unknown type 'essay'".into());
        assert!(!err.is_retryable());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
