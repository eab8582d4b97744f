use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Read-optimised outcome of one evaluated attempt. Exactly one per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QuizResult {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub student_id: Uuid,
    pub attempt_id: Uuid,
    pub total_score: Decimal,
    pub max_score: Decimal,
    pub percentage: Decimal,
    pub is_passed: bool,
    pub passing_marks: Decimal,
    pub correct_answers: i32,
    pub incorrect_answers: i32,
    pub unanswered: i32,
    pub time_taken_seconds: i64,
    pub submitted_at: DateTime<Utc>,
    /// Filled by the batch ranking job.
    pub rank: Option<i32>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}
