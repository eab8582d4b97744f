//! Storage seams of the attempt engine.
//!
//! The invariants of the attempt lifecycle (one active attempt per student
//! and quiz, the attempt cap, no answer after submission) are enforced by the
//! store implementations themselves, not by callers holding locks.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::answer::AnswerEntry;
use crate::models::attempt::{Attempt, NewAttempt, SubmitReason, TabSwitchEntry};
use crate::models::attempt_event::AttemptEvent;
use crate::models::question::Question;
use crate::models::quiz::Quiz;
use crate::models::result::QuizResult;

/// Read-only view of the quiz catalog.
#[async_trait]
pub trait QuizCatalog: Send + Sync {
    async fn get_quiz_by_id(&self, quiz_id: Uuid) -> Result<Option<Quiz>>;

    /// Questions in catalog order.
    async fn get_questions_for_quiz(&self, quiz_id: Uuid) -> Result<Vec<Question>>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Atomically checks the active-attempt and attempt-count invariants and
    /// inserts the attempt with the next attempt number.
    ///
    /// Fails with `DuplicateActiveAttempt` or `AttemptLimitExceeded`.
    async fn create_attempt(&self, new: NewAttempt, max_attempts: u32) -> Result<Attempt>;

    async fn load_attempt(&self, attempt_id: Uuid) -> Result<Attempt>;

    async fn find_active(&self, student_id: Uuid, quiz_id: Uuid) -> Result<Option<Attempt>>;

    async fn list_attempts(&self, student_id: Uuid, quiz_id: Uuid) -> Result<Vec<Attempt>>;

    /// Upserts one answer without touching the others. Only succeeds while
    /// the attempt is in progress.
    async fn upsert_answer(
        &self,
        attempt_id: Uuid,
        question_id: Uuid,
        entry: AnswerEntry,
    ) -> Result<()>;

    /// Appends to the tab switch log and returns the new count.
    async fn record_tab_switch(&self, attempt_id: Uuid, entry: TabSwitchEntry) -> Result<i32>;

    /// `in_progress -> submitted`. Returns the attempt with its answers as
    /// frozen by the transition.
    async fn mark_submitted(
        &self,
        attempt_id: Uuid,
        submitted_at: DateTime<Utc>,
        reason: SubmitReason,
    ) -> Result<Attempt>;

    /// `submitted -> evaluated`, persisting the graded answers and scores of
    /// `attempt`. Already evaluated attempts are returned unchanged.
    async fn mark_evaluated(&self, attempt: &Attempt, evaluated_at: DateTime<Utc>)
        -> Result<Attempt>;

    /// Moves any non-voided attempt to `voided` and writes an audit entry.
    async fn mark_voided(
        &self,
        attempt_id: Uuid,
        reason: &str,
        actor_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<Attempt>;

    /// In-progress attempts whose deadline has passed, oldest first.
    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Fails with `ResultAlreadyExists` if the attempt already has a result.
    async fn insert_result(&self, result: &QuizResult) -> Result<()>;

    async fn result_for_attempt(&self, attempt_id: Uuid) -> Result<Option<QuizResult>>;
}

/// Receiver of lifecycle events for audit and analytics consumers.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: AttemptEvent) -> Result<()>;
}
