//! In-process implementations of the storage traits. Every operation runs
//! under one mutex, which gives the same atomicity the Postgres store gets
//! from its constraints and conditional updates.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::answer::AnswerEntry;
use crate::models::attempt::{Attempt, AttemptStatus, NewAttempt, SubmitReason, TabSwitchEntry};
use crate::models::attempt_event::{AttemptEvent, EventKind};
use crate::models::audit_log::AuditLog;
use crate::models::question::Question;
use crate::models::quiz::Quiz;
use crate::models::result::QuizResult;
use crate::store::{AttemptStore, EventSink, QuizCatalog, ResultStore};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Internal("memory store mutex poisoned".to_string()))
}

#[derive(Default)]
pub struct MemoryCatalog {
    quizzes: Mutex<HashMap<Uuid, (Quiz, Vec<Question>)>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_quiz(&self, quiz: Quiz, questions: Vec<Question>) -> Result<()> {
        lock(&self.quizzes)?.insert(quiz.id, (quiz, questions));
        Ok(())
    }

    /// Simulates an author editing the quiz after publication.
    pub fn replace_questions(&self, quiz_id: Uuid, questions: Vec<Question>) -> Result<()> {
        let mut guard = lock(&self.quizzes)?;
        let entry = guard
            .get_mut(&quiz_id)
            .ok_or_else(|| Error::NotFound(format!("quiz {} not found", quiz_id)))?;
        entry.1 = questions;
        Ok(())
    }
}

#[async_trait]
impl QuizCatalog for MemoryCatalog {
    async fn get_quiz_by_id(&self, quiz_id: Uuid) -> Result<Option<Quiz>> {
        Ok(lock(&self.quizzes)?.get(&quiz_id).map(|(q, _)| q.clone()))
    }

    async fn get_questions_for_quiz(&self, quiz_id: Uuid) -> Result<Vec<Question>> {
        Ok(lock(&self.quizzes)?
            .get(&quiz_id)
            .map(|(_, qs)| qs.clone())
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct MemoryState {
    attempts: HashMap<Uuid, Attempt>,
    results: HashMap<Uuid, QuizResult>,
    audit: Vec<AuditLog>,
}

impl MemoryState {
    fn attempt_mut(&mut self, attempt_id: Uuid) -> Result<&mut Attempt> {
        self.attempts
            .get_mut(&attempt_id)
            .ok_or(Error::AttemptNotFound(attempt_id))
    }

    fn in_progress_mut(&mut self, attempt_id: Uuid) -> Result<&mut Attempt> {
        let attempt = self.attempt_mut(attempt_id)?;
        if !attempt.is_in_progress() {
            return Err(Error::AttemptNotInProgress);
        }
        Ok(attempt)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audit_log(&self) -> Result<Vec<AuditLog>> {
        Ok(lock(&self.state)?.audit.clone())
    }

    pub fn result_count(&self) -> Result<usize> {
        Ok(lock(&self.state)?.results.len())
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn create_attempt(&self, new: NewAttempt, max_attempts: u32) -> Result<Attempt> {
        let mut state = lock(&self.state)?;
        let prior: Vec<&Attempt> = state
            .attempts
            .values()
            .filter(|a| a.student_id == new.student_id && a.quiz_id == new.quiz_id)
            .collect();

        if prior.iter().any(|a| a.is_in_progress()) {
            return Err(Error::DuplicateActiveAttempt);
        }
        if prior.len() as u32 >= max_attempts {
            return Err(Error::AttemptLimitExceeded { max_attempts });
        }

        let attempt = new.into_attempt(prior.len() as i32 + 1);
        state.attempts.insert(attempt.id, attempt.clone());
        Ok(attempt)
    }

    async fn load_attempt(&self, attempt_id: Uuid) -> Result<Attempt> {
        lock(&self.state)?
            .attempts
            .get(&attempt_id)
            .cloned()
            .ok_or(Error::AttemptNotFound(attempt_id))
    }

    async fn find_active(&self, student_id: Uuid, quiz_id: Uuid) -> Result<Option<Attempt>> {
        Ok(lock(&self.state)?
            .attempts
            .values()
            .find(|a| a.student_id == student_id && a.quiz_id == quiz_id && a.is_in_progress())
            .cloned())
    }

    async fn list_attempts(&self, student_id: Uuid, quiz_id: Uuid) -> Result<Vec<Attempt>> {
        let mut attempts: Vec<Attempt> = lock(&self.state)?
            .attempts
            .values()
            .filter(|a| a.student_id == student_id && a.quiz_id == quiz_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }

    async fn upsert_answer(
        &self,
        attempt_id: Uuid,
        question_id: Uuid,
        entry: AnswerEntry,
    ) -> Result<()> {
        let mut state = lock(&self.state)?;
        let attempt = state.in_progress_mut(attempt_id)?;
        attempt.answers.insert(question_id, entry);
        Ok(())
    }

    async fn record_tab_switch(&self, attempt_id: Uuid, entry: TabSwitchEntry) -> Result<i32> {
        let mut state = lock(&self.state)?;
        let attempt = state.in_progress_mut(attempt_id)?;
        attempt.tab_switches += 1;
        attempt.tab_switch_log.push(entry);
        Ok(attempt.tab_switches)
    }

    async fn mark_submitted(
        &self,
        attempt_id: Uuid,
        submitted_at: DateTime<Utc>,
        reason: SubmitReason,
    ) -> Result<Attempt> {
        let mut state = lock(&self.state)?;
        let attempt = state.in_progress_mut(attempt_id)?;
        attempt.status = AttemptStatus::Submitted;
        attempt.submitted_at = Some(submitted_at);
        attempt.submit_reason = Some(reason);
        Ok(attempt.clone())
    }

    async fn mark_evaluated(
        &self,
        evaluated: &Attempt,
        evaluated_at: DateTime<Utc>,
    ) -> Result<Attempt> {
        let mut state = lock(&self.state)?;
        let attempt = state.attempt_mut(evaluated.id)?;
        match attempt.status {
            AttemptStatus::Submitted => {
                attempt.status = AttemptStatus::Evaluated;
                attempt.answers = evaluated.answers.clone();
                attempt.total_score = evaluated.total_score;
                attempt.percentage = evaluated.percentage;
                attempt.evaluated_at = Some(evaluated_at);
                Ok(attempt.clone())
            }
            AttemptStatus::Evaluated => Ok(attempt.clone()),
            from => Err(Error::InvalidTransition {
                from,
                to: AttemptStatus::Evaluated,
            }),
        }
    }

    async fn mark_voided(
        &self,
        attempt_id: Uuid,
        reason: &str,
        actor_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<Attempt> {
        let mut state = lock(&self.state)?;
        let attempt = state.attempt_mut(attempt_id)?;
        let from = attempt.status;
        if !from.can_transition_to(AttemptStatus::Voided) {
            return Err(Error::InvalidTransition {
                from,
                to: AttemptStatus::Voided,
            });
        }
        attempt.status = AttemptStatus::Voided;
        attempt.voided_at = Some(at);
        attempt.void_reason = Some(reason.to_string());
        let voided = attempt.clone();

        state.audit.push(AuditLog {
            id: Uuid::new_v4(),
            actor_id,
            action: "void_attempt".to_string(),
            entity_type: "quiz_attempt".to_string(),
            entity_id: attempt_id,
            changes: Some(json!({ "from": from, "to": AttemptStatus::Voided, "reason": reason })),
            created_at: at,
        });
        Ok(voided)
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>> {
        let state = lock(&self.state)?;
        let mut expired: Vec<&Attempt> = state
            .attempts
            .values()
            .filter(|a| a.is_in_progress() && a.is_expired(now))
            .collect();
        expired.sort_by_key(|a| a.deadline_at);
        Ok(expired
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|a| a.id)
            .collect())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn insert_result(&self, result: &QuizResult) -> Result<()> {
        let mut state = lock(&self.state)?;
        if state.results.contains_key(&result.attempt_id) {
            return Err(Error::ResultAlreadyExists(result.attempt_id));
        }
        state.results.insert(result.attempt_id, result.clone());
        Ok(())
    }

    async fn result_for_attempt(&self, attempt_id: Uuid) -> Result<Option<QuizResult>> {
        Ok(lock(&self.state)?.results.get(&attempt_id).cloned())
    }
}

/// Keeps emitted events in order, for inspection.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<AttemptEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Result<Vec<AttemptEvent>> {
        Ok(lock(&self.events)?.clone())
    }

    pub fn kinds_for(&self, attempt_id: Uuid) -> Result<Vec<EventKind>> {
        Ok(lock(&self.events)?
            .iter()
            .filter(|e| e.attempt_id == attempt_id)
            .map(|e| e.kind)
            .collect())
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, event: AttemptEvent) -> Result<()> {
        lock(&self.events)?.push(event);
        Ok(())
    }
}
