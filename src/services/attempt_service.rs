use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::answer::{Answer, AnswerEntry};
use crate::models::attempt::{
    Attempt, AttemptStatus, NewAttempt, PresentedQuestion, QuizSnapshot, SubmitReason,
    TabSwitchEntry,
};
use crate::models::attempt_event::{AttemptEvent, EventKind};
use crate::models::result::QuizResult;
use crate::services::grading_service::GradingService;
use crate::services::result_service::ResultService;
use crate::store::{AttemptStore, EventSink, QuizCatalog, ResultStore};
use crate::utils::time::Clock;

/// Optional rules applied at the entry of `record_answer` and `submit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttemptPolicy {
    pub max_tab_switches: Option<u32>,
}

impl AttemptPolicy {
    fn tab_limit_reached(&self, attempt: &Attempt) -> bool {
        match self.max_tab_switches {
            Some(max) => attempt.tab_switches.max(0) as u32 >= max,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartedAttempt {
    pub attempt: Attempt,
    pub questions: Vec<PresentedQuestion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub attempt: Attempt,
    pub result: QuizResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptStatusView {
    pub attempt_id: Uuid,
    pub quiz_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    /// Seed for the client countdown. Never trusted on the way back in.
    pub time_remaining_seconds: i64,
    pub answered: usize,
    pub total_questions: usize,
    pub tab_switches: i32,
}

/// Drives an attempt through `in_progress -> submitted -> evaluated`.
#[derive(Clone)]
pub struct AttemptService {
    catalog: Arc<dyn QuizCatalog>,
    attempts: Arc<dyn AttemptStore>,
    results: ResultService,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    policy: AttemptPolicy,
}

impl AttemptService {
    pub fn new(
        catalog: Arc<dyn QuizCatalog>,
        attempts: Arc<dyn AttemptStore>,
        results: Arc<dyn ResultStore>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            attempts,
            results: ResultService::new(results),
            events,
            clock,
            policy: AttemptPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: AttemptPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn start_attempt(&self, student_id: Uuid, quiz_id: Uuid) -> Result<StartedAttempt> {
        let now = self.clock.now();
        let quiz = self
            .catalog
            .get_quiz_by_id(quiz_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Quiz {} not found", quiz_id)))?;
        quiz.check_available(now)?;

        // An abandoned attempt past its deadline is closed before the next one.
        if let Some(active) = self.attempts.find_active(student_id, quiz_id).await? {
            if active.is_expired(now) {
                self.auto_submit(&active, SubmitReason::Timeout, now).await?;
            }
        }

        let questions = self.catalog.get_questions_for_quiz(quiz_id).await?;
        let snapshot = QuizSnapshot::freeze(&quiz, questions);
        let new = NewAttempt::new(quiz_id, student_id, snapshot, now);
        let attempt = self
            .attempts
            .create_attempt(new, quiz.max_attempts())
            .await?;

        tracing::info!(
            attempt_id = %attempt.id,
            quiz_id = %quiz_id,
            student_id = %student_id,
            attempt_number = attempt.attempt_number,
            "attempt started"
        );
        self.emit(
            EventKind::AttemptStarted,
            &attempt,
            json!({
                "attempt_number": attempt.attempt_number,
                "deadline_at": attempt.deadline_at,
                "question_count": attempt.snapshot.questions.len(),
            }),
        )
        .await;

        Ok(StartedAttempt {
            questions: attempt.presented_questions(),
            attempt,
        })
    }

    /// Upserts one answer and returns the time it was recorded at.
    pub async fn record_answer(
        &self,
        student_id: Uuid,
        attempt_id: Uuid,
        question_id: Uuid,
        answer: Answer,
    ) -> Result<DateTime<Utc>> {
        let attempt = self.attempt_for_student(student_id, attempt_id).await?;
        if !attempt.is_in_progress() {
            return Err(Error::AttemptNotInProgress);
        }

        let now = self.clock.now();
        if attempt.is_expired(now) {
            self.auto_submit(&attempt, SubmitReason::Timeout, now).await?;
            return Err(Error::AttemptNotInProgress);
        }
        if self.policy.tab_limit_reached(&attempt) {
            self.auto_submit(&attempt, SubmitReason::TabSwitchPolicy, now)
                .await?;
            return Err(Error::AttemptNotInProgress);
        }

        let question = attempt
            .snapshot
            .question(question_id)
            .ok_or(Error::QuestionNotInAttempt(question_id))?;
        if !answer.fits(question.question_type) {
            tracing::debug!(
                attempt_id = %attempt_id,
                question_id = %question_id,
                question_type = ?question.question_type,
                "answer shape does not fit question type, will grade as malformed"
            );
        }

        self.attempts
            .upsert_answer(attempt_id, question_id, AnswerEntry::new(answer, now))
            .await?;
        Ok(now)
    }

    /// Records a proctoring signal. Never changes the attempt status.
    pub async fn record_tab_switch(
        &self,
        student_id: Uuid,
        attempt_id: Uuid,
        kind: &str,
    ) -> Result<i32> {
        let attempt = self.attempt_for_student(student_id, attempt_id).await?;
        if !attempt.is_in_progress() {
            return Err(Error::AttemptNotInProgress);
        }

        let now = self.clock.now();
        let entry = TabSwitchEntry {
            kind: kind.to_string(),
            at: now,
        };
        let count = self.attempts.record_tab_switch(attempt_id, entry).await?;

        if matches!(self.policy.max_tab_switches, Some(max) if count.max(0) as u32 >= max) {
            tracing::warn!(
                attempt_id = %attempt_id,
                tab_switches = count,
                "tab switch limit reached, attempt closes on next answer or submit"
            );
        } else {
            tracing::info!(attempt_id = %attempt_id, tab_switches = count, "tab switch recorded");
        }
        self.emit(
            EventKind::TabSwitchRecorded,
            &attempt,
            json!({ "kind": kind, "count": count }),
        )
        .await;
        Ok(count)
    }

    pub async fn submit(
        &self,
        student_id: Uuid,
        attempt_id: Uuid,
        reason: SubmitReason,
    ) -> Result<SubmitOutcome> {
        let attempt = self.attempt_for_student(student_id, attempt_id).await?;
        if !attempt.is_in_progress() {
            return Err(Error::AttemptNotInProgress);
        }

        let reason = if reason == SubmitReason::User && self.policy.tab_limit_reached(&attempt) {
            SubmitReason::TabSwitchPolicy
        } else {
            reason
        };
        let submitted = self
            .close(&attempt, reason, self.clock.now())
            .await?;
        let (attempt, result) = self.evaluate_submitted(submitted).await?;
        Ok(SubmitOutcome { attempt, result })
    }

    /// Re-runs scoring for an attempt left in `submitted`. Evaluated
    /// attempts return their existing result.
    pub async fn retry_evaluation(&self, attempt_id: Uuid) -> Result<SubmitOutcome> {
        let attempt = self.attempts.load_attempt(attempt_id).await?;
        match attempt.status {
            AttemptStatus::Submitted => {
                let (attempt, result) = self.evaluate_submitted(attempt).await?;
                Ok(SubmitOutcome { attempt, result })
            }
            AttemptStatus::Evaluated => {
                let result = self.existing_result(attempt_id).await?;
                Ok(SubmitOutcome { attempt, result })
            }
            from => Err(Error::InvalidTransition {
                from,
                to: AttemptStatus::Evaluated,
            }),
        }
    }

    /// Administrative invalidation. Voided attempts keep counting toward the
    /// attempt cap.
    pub async fn void_attempt(
        &self,
        attempt_id: Uuid,
        reason: &str,
        actor_id: Option<Uuid>,
    ) -> Result<Attempt> {
        let now = self.clock.now();
        let voided = self
            .attempts
            .mark_voided(attempt_id, reason, actor_id, now)
            .await?;

        tracing::warn!(
            attempt_id = %attempt_id,
            actor_id = ?actor_id,
            reason = reason,
            "attempt voided"
        );
        self.emit(
            EventKind::AttemptVoided,
            &voided,
            json!({ "reason": reason, "actor_id": actor_id }),
        )
        .await;
        Ok(voided)
    }

    pub async fn load_attempt(&self, attempt_id: Uuid) -> Result<Attempt> {
        self.attempts.load_attempt(attempt_id).await
    }

    /// Loads an attempt owned by `student_id`. Someone else's attempt is
    /// reported as missing.
    pub async fn attempt_for_student(&self, student_id: Uuid, attempt_id: Uuid) -> Result<Attempt> {
        let attempt = self.attempts.load_attempt(attempt_id).await?;
        if attempt.student_id != student_id {
            return Err(Error::AttemptNotFound(attempt_id));
        }
        Ok(attempt)
    }

    pub async fn attempt_status(&self, student_id: Uuid, attempt_id: Uuid) -> Result<AttemptStatusView> {
        let attempt = self.attempt_for_student(student_id, attempt_id).await?;
        Ok(self.status_view(&attempt))
    }

    /// The attempt together with a status view computed from that same
    /// load, so the two never disagree.
    pub async fn attempt_detail(
        &self,
        student_id: Uuid,
        attempt_id: Uuid,
    ) -> Result<(AttemptStatusView, Attempt)> {
        let attempt = self.attempt_for_student(student_id, attempt_id).await?;
        Ok((self.status_view(&attempt), attempt))
    }

    fn status_view(&self, attempt: &Attempt) -> AttemptStatusView {
        AttemptStatusView {
            attempt_id: attempt.id,
            quiz_id: attempt.quiz_id,
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            started_at: attempt.started_at,
            deadline_at: attempt.deadline_at,
            submitted_at: attempt.submitted_at,
            time_remaining_seconds: attempt.time_remaining_seconds(self.clock.now()),
            answered: attempt.answers.len(),
            total_questions: attempt.snapshot.questions.len(),
            tab_switches: attempt.tab_switches,
        }
    }

    pub async fn list_attempts(&self, student_id: Uuid, quiz_id: Uuid) -> Result<Vec<Attempt>> {
        self.attempts.list_attempts(student_id, quiz_id).await
    }

    pub async fn result_for_student(&self, student_id: Uuid, attempt_id: Uuid) -> Result<QuizResult> {
        self.attempt_for_student(student_id, attempt_id).await?;
        self.results
            .for_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Result for attempt {} not found", attempt_id)))
    }

    /// Auto-submits in-progress attempts past their deadline. Returns how
    /// many were closed.
    pub async fn expire_overdue(&self, limit: i64) -> Result<usize> {
        let now = self.clock.now();
        let expired = self.attempts.list_expired(now, limit).await?;
        let mut closed = 0;

        for attempt_id in expired {
            let attempt = match self.attempts.load_attempt(attempt_id).await {
                Ok(attempt) => attempt,
                Err(e) => {
                    tracing::error!(attempt_id = %attempt_id, error = %e, "failed to load expired attempt");
                    continue;
                }
            };
            match self.auto_submit(&attempt, SubmitReason::Timeout, now).await {
                Ok(()) => closed += 1,
                Err(e) => {
                    tracing::error!(attempt_id = %attempt_id, error = %e, "failed to expire attempt")
                }
            }
        }

        if closed > 0 {
            tracing::info!(closed, "expired attempts auto-submitted");
        }
        Ok(closed)
    }

    /// Server-initiated submission. Losing the race to another submission is
    /// not an error, and a scoring failure leaves the attempt `submitted`
    /// for a later retry.
    async fn auto_submit(
        &self,
        attempt: &Attempt,
        reason: SubmitReason,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let submitted = match self.close(attempt, reason, now).await {
            Ok(submitted) => submitted,
            Err(Error::AttemptNotInProgress) => return Ok(()),
            Err(e) => return Err(e),
        };
        if let Err(e) = self.evaluate_submitted(submitted).await {
            tracing::warn!(
                attempt_id = %attempt.id,
                error = %e,
                "evaluation after auto-submit failed, attempt left submitted"
            );
        }
        Ok(())
    }

    async fn close(
        &self,
        attempt: &Attempt,
        reason: SubmitReason,
        now: DateTime<Utc>,
    ) -> Result<Attempt> {
        let submitted_at = attempt.effective_submission_time(now);
        let submitted = self
            .attempts
            .mark_submitted(attempt.id, submitted_at, reason)
            .await?;

        tracing::info!(
            attempt_id = %submitted.id,
            reason = %reason,
            submitted_at = %submitted_at,
            answered = submitted.answers.len(),
            "attempt submitted"
        );
        self.emit(
            EventKind::AttemptSubmitted,
            &submitted,
            json!({ "reason": reason, "submitted_at": submitted_at }),
        )
        .await;
        Ok(submitted)
    }

    async fn evaluate_submitted(&self, attempt: Attempt) -> Result<(Attempt, QuizResult)> {
        let now = self.clock.now();
        let evaluation =
            GradingService::evaluate(&attempt.snapshot.questions, &attempt.answer_values());

        let malformed = evaluation.per_question.iter().filter(|o| o.malformed).count();
        if malformed > 0 {
            tracing::warn!(attempt_id = %attempt.id, malformed, "malformed answers graded");
        }

        let result = match self.results.publish(&attempt, &evaluation, now).await {
            Ok(result) => result,
            Err(Error::ResultAlreadyExists(_)) => self.existing_result(attempt.id).await?,
            Err(e) => {
                tracing::error!(attempt_id = %attempt.id, error = %e, "failed to publish result");
                return Err(e);
            }
        };

        let mut graded = attempt;
        graded.apply_evaluation(&evaluation);
        let evaluated = self.attempts.mark_evaluated(&graded, now).await?;

        self.emit(
            EventKind::AttemptEvaluated,
            &evaluated,
            json!({
                "result_id": result.id,
                "total_score": result.total_score,
                "percentage": result.percentage,
                "is_passed": result.is_passed,
            }),
        )
        .await;
        Ok((evaluated, result))
    }

    async fn existing_result(&self, attempt_id: Uuid) -> Result<QuizResult> {
        self.results.for_attempt(attempt_id).await?.ok_or_else(|| {
            Error::Internal(format!("result for attempt {} disappeared", attempt_id))
        })
    }

    /// Sink failures are logged and never fail the operation.
    async fn emit(&self, kind: EventKind, attempt: &Attempt, data: serde_json::Value) {
        let event = AttemptEvent {
            id: Uuid::new_v4(),
            kind,
            attempt_id: attempt.id,
            quiz_id: attempt.quiz_id,
            student_id: attempt.student_id,
            occurred_at: self.clock.now(),
            data,
        };
        if let Err(e) = self.events.emit(event).await {
            tracing::error!(
                attempt_id = %attempt.id,
                event = kind.as_str(),
                error = %e,
                "failed to emit attempt event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{Question, QuestionOption, QuestionType};
    use crate::models::quiz::Quiz;
    use crate::store::memory::{MemoryCatalog, MemoryEventSink, MemoryStore};
    use crate::store::MockResultStore;
    use crate::utils::time::ManualClock;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn quiz(now: DateTime<Utc>) -> (Quiz, Vec<Question>) {
        let quiz = Quiz {
            id: Uuid::new_v4(),
            title: "Capitals".into(),
            duration_minutes: 10,
            max_attempts: 2,
            passing_marks: Decimal::ONE,
            total_marks: Decimal::ONE,
            shuffle_questions: false,
            shuffle_options: false,
            start_time: None,
            end_time: Some(now + chrono::Duration::days(1)),
            is_active: true,
            is_published: true,
        };
        let question = Question {
            id: Uuid::new_v4(),
            question_type: QuestionType::SingleChoice,
            text: "Capital of France?".into(),
            options: vec![
                QuestionOption { id: "A".into(), text: "Paris".into(), is_correct: true },
                QuestionOption { id: "B".into(), text: "Lyon".into(), is_correct: false },
            ],
            correct_answer: None,
            marks: Decimal::ONE,
            order_number: 1,
        };
        (quiz, vec![question])
    }

    struct Harness {
        service: AttemptService,
        store: Arc<MemoryStore>,
        quiz_id: Uuid,
        question_id: Uuid,
    }

    fn harness(results: Arc<dyn ResultStore>) -> Harness {
        let now = Utc::now();
        let (quiz, questions) = quiz(now);
        let quiz_id = quiz.id;
        let question_id = questions[0].id;
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.upsert_quiz(quiz, questions).unwrap();
        let store = Arc::new(MemoryStore::new());
        let service = AttemptService::new(
            catalog,
            store.clone(),
            results,
            Arc::new(MemoryEventSink::new()),
            Arc::new(ManualClock::new(now)),
        );
        Harness { service, store, quiz_id, question_id }
    }

    #[tokio::test]
    async fn failed_result_insert_leaves_attempt_submitted_until_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stored: Arc<Mutex<Option<QuizResult>>> = Arc::new(Mutex::new(None));

        let mut results = MockResultStore::new();
        let insert_calls = calls.clone();
        let insert_stored = stored.clone();
        results.expect_insert_result().returning(move |result| {
            if insert_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(Error::Database(sqlx::Error::PoolTimedOut));
            }
            *insert_stored.lock().unwrap() = Some(result.clone());
            Ok(())
        });
        let lookup_stored = stored.clone();
        results
            .expect_result_for_attempt()
            .returning(move |_| Ok(lookup_stored.lock().unwrap().clone()));

        let h = harness(Arc::new(results));
        let student = Uuid::new_v4();
        let started = h.service.start_attempt(student, h.quiz_id).await.unwrap();
        let attempt_id = started.attempt.id;
        h.service
            .record_answer(
                student,
                attempt_id,
                h.question_id,
                Answer::SingleChoice { option_id: "A".into() },
            )
            .await
            .unwrap();

        let err = h
            .service
            .submit(student, attempt_id, SubmitReason::User)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        let stuck = h.store.load_attempt(attempt_id).await.unwrap();
        assert_eq!(stuck.status, AttemptStatus::Submitted);

        let retried = h.service.retry_evaluation(attempt_id).await.unwrap();
        assert_eq!(retried.attempt.status, AttemptStatus::Evaluated);
        assert_eq!(retried.result.total_score, Decimal::ONE);
        assert_eq!(retried.result.percentage, Decimal::from(100));

        let again = h.service.retry_evaluation(attempt_id).await.unwrap();
        assert_eq!(again.result.id, retried.result.id);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn duplicate_result_is_treated_as_success() {
        let existing: Arc<Mutex<Option<QuizResult>>> = Arc::new(Mutex::new(None));
        let mut results = MockResultStore::new();
        let insert_existing = existing.clone();
        results.expect_insert_result().returning(move |result| {
            let mut guard = insert_existing.lock().unwrap();
            if guard.is_some() {
                return Err(Error::ResultAlreadyExists(result.attempt_id));
            }
            *guard = Some(result.clone());
            Err(Error::ResultAlreadyExists(result.attempt_id))
        });
        let lookup = existing.clone();
        results
            .expect_result_for_attempt()
            .returning(move |_| Ok(lookup.lock().unwrap().clone()));

        let h = harness(Arc::new(results));
        let student = Uuid::new_v4();
        let started = h.service.start_attempt(student, h.quiz_id).await.unwrap();
        let outcome = h
            .service
            .submit(student, started.attempt.id, SubmitReason::User)
            .await
            .unwrap();
        assert_eq!(outcome.attempt.status, AttemptStatus::Evaluated);
        assert_eq!(outcome.result.unanswered, 1);
    }

    #[test]
    fn policy_without_limit_never_triggers() {
        let (quiz, questions) = quiz(Utc::now());
        let snapshot = QuizSnapshot::freeze(&quiz, questions);
        let mut attempt =
            NewAttempt::new(quiz.id, Uuid::new_v4(), snapshot, Utc::now()).into_attempt(1);
        attempt.tab_switches = 50;
        assert!(!AttemptPolicy::default().tab_limit_reached(&attempt));
        assert!(AttemptPolicy { max_tab_switches: Some(3) }.tab_limit_reached(&attempt));
    }
}
