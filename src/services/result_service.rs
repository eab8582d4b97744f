use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::attempt::{Attempt, SubmitReason};
use crate::models::result::QuizResult;
use crate::services::grading_service::Evaluation;
use crate::store::ResultStore;

#[derive(Clone)]
pub struct ResultService {
    results: Arc<dyn ResultStore>,
}

impl ResultService {
    pub fn new(results: Arc<dyn ResultStore>) -> Self {
        Self { results }
    }

    /// Builds the result record for a submitted attempt. The attempt must
    /// carry a submission time.
    pub fn project(
        attempt: &Attempt,
        evaluation: &Evaluation,
        created_at: DateTime<Utc>,
    ) -> Result<QuizResult> {
        let submitted_at = attempt.submitted_at.ok_or_else(|| {
            Error::Internal(format!("attempt {} has no submission time", attempt.id))
        })?;
        let time_taken_seconds = (submitted_at - attempt.started_at).num_seconds().max(0);
        let passing_marks = attempt.snapshot.passing_marks;

        let remarks = match attempt.submit_reason {
            Some(SubmitReason::Timeout) => {
                Some("Auto-submitted when the time limit was reached".to_string())
            }
            Some(SubmitReason::TabSwitchPolicy) => {
                Some("Auto-submitted after exceeding the tab switch limit".to_string())
            }
            Some(SubmitReason::User) | None => None,
        };

        Ok(QuizResult {
            id: Uuid::new_v4(),
            quiz_id: attempt.quiz_id,
            student_id: attempt.student_id,
            attempt_id: attempt.id,
            total_score: evaluation.total_score,
            max_score: evaluation.max_score,
            percentage: evaluation.percentage(),
            is_passed: evaluation.is_passed(passing_marks),
            passing_marks,
            correct_answers: evaluation.correct_count as i32,
            incorrect_answers: evaluation.incorrect_count as i32,
            unanswered: evaluation.unanswered_count as i32,
            time_taken_seconds,
            submitted_at,
            rank: None,
            remarks,
            created_at,
        })
    }

    /// Persists the projection. Fails with `ResultAlreadyExists` when the
    /// attempt already has one.
    pub async fn publish(
        &self,
        attempt: &Attempt,
        evaluation: &Evaluation,
        now: DateTime<Utc>,
    ) -> Result<QuizResult> {
        let result = Self::project(attempt, evaluation, now)?;
        self.results.insert_result(&result).await?;
        tracing::info!(
            attempt_id = %attempt.id,
            result_id = %result.id,
            total_score = %result.total_score,
            percentage = %result.percentage,
            is_passed = result.is_passed,
            "result published"
        );
        Ok(result)
    }

    pub async fn for_attempt(&self, attempt_id: Uuid) -> Result<Option<QuizResult>> {
        self.results.result_for_attempt(attempt_id).await
    }
}
