use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::answer::AnswerEntry;
use crate::models::attempt::{
    Attempt, AttemptStatus, NewAttempt, QuizSnapshot, SubmitReason, TabSwitchEntry,
};
use crate::models::question::{Question, QuestionRecord};
use crate::models::quiz::Quiz;
use crate::models::result::QuizResult;
use crate::store::{AttemptStore, QuizCatalog, ResultStore};

const ACTIVE_ATTEMPT_INDEX: &str = "quiz_attempts_one_active_idx";
const ATTEMPT_NUMBER_INDEX: &str = "quiz_attempts_number_idx";
const RESULT_ATTEMPT_CONSTRAINT: &str = "quiz_results_attempt_unique";

const ATTEMPT_COLUMNS: &str = r#"
    id, quiz_id, student_id, attempt_number, status, snapshot, shuffle_seed, answers,
    started_at, deadline_at, submitted_at, submit_reason, evaluated_at,
    total_score, percentage, tab_switches, tab_switch_log, voided_at, void_reason
"#;

fn violates(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("23505") && db.constraint() == Some(constraint)
        }
        _ => false,
    }
}

fn attempt_from_row(row: &PgRow) -> Result<Attempt> {
    let status: String = row.try_get("status")?;
    let submit_reason: Option<String> = row.try_get("submit_reason")?;
    let shuffle_seed: Option<i64> = row.try_get("shuffle_seed")?;
    let Json(snapshot): Json<QuizSnapshot> = row.try_get("snapshot")?;
    let Json(answers): Json<BTreeMap<Uuid, AnswerEntry>> = row.try_get("answers")?;
    let Json(tab_switch_log): Json<Vec<TabSwitchEntry>> = row.try_get("tab_switch_log")?;

    Ok(Attempt {
        id: row.try_get("id")?,
        quiz_id: row.try_get("quiz_id")?,
        student_id: row.try_get("student_id")?,
        attempt_number: row.try_get("attempt_number")?,
        status: status.parse()?,
        snapshot,
        // Stored as BIGINT; the bit pattern is what matters.
        shuffle_seed: shuffle_seed.map(|s| s as u64),
        answers,
        started_at: row.try_get("started_at")?,
        deadline_at: row.try_get("deadline_at")?,
        submitted_at: row.try_get("submitted_at")?,
        submit_reason: submit_reason.map(|r| r.parse()).transpose()?,
        evaluated_at: row.try_get("evaluated_at")?,
        total_score: row.try_get("total_score")?,
        percentage: row.try_get("percentage")?,
        tab_switches: row.try_get("tab_switches")?,
        tab_switch_log,
        voided_at: row.try_get("voided_at")?,
        void_reason: row.try_get("void_reason")?,
    })
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguishes "no such attempt" from "not in progress" after a
    /// conditional update touched no row.
    async fn not_in_progress(&self, attempt_id: Uuid) -> Error {
        match sqlx::query("SELECT status FROM quiz_attempts WHERE id = $1")
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(_)) => Error::AttemptNotInProgress,
            Ok(None) => Error::AttemptNotFound(attempt_id),
            Err(e) => Error::Database(e),
        }
    }
}

#[async_trait]
impl QuizCatalog for PgStore {
    async fn get_quiz_by_id(&self, quiz_id: Uuid) -> Result<Option<Quiz>> {
        let quiz = sqlx::query_as::<_, Quiz>(
            r#"
            SELECT id, title, duration_minutes, max_attempts, passing_marks, total_marks,
                   shuffle_questions, shuffle_options, start_time, end_time,
                   is_active, is_published
            FROM quizzes WHERE id = $1
            "#,
        )
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(quiz)
    }

    async fn get_questions_for_quiz(&self, quiz_id: Uuid) -> Result<Vec<Question>> {
        let records = sqlx::query_as::<_, QuestionRecord>(
            r#"
            SELECT id, question_type, question_text, options, correct_answer, marks, order_number
            FROM questions
            WHERE quiz_id = $1
            ORDER BY order_number ASC, id ASC
            "#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(QuestionRecord::normalize).collect()
    }
}

#[async_trait]
impl AttemptStore for PgStore {
    async fn create_attempt(&self, new: NewAttempt, max_attempts: u32) -> Result<Attempt> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent starts for the same pair across instances;
        // the unique indexes below are the backstop.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{}:{}", new.student_id, new.quiz_id))
            .execute(&mut *tx)
            .await?;

        let counts = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'in_progress') AS active
            FROM quiz_attempts
            WHERE student_id = $1 AND quiz_id = $2
            "#,
        )
        .bind(new.student_id)
        .bind(new.quiz_id)
        .fetch_one(&mut *tx)
        .await?;
        let total: i64 = counts.try_get("total")?;
        let active: i64 = counts.try_get("active")?;

        if active > 0 {
            return Err(Error::DuplicateActiveAttempt);
        }
        if total >= max_attempts as i64 {
            return Err(Error::AttemptLimitExceeded { max_attempts });
        }

        let attempt = new.into_attempt(total as i32 + 1);
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO quiz_attempts (
                id, quiz_id, student_id, attempt_number, status, snapshot, shuffle_seed, answers,
                started_at, deadline_at, total_score, percentage, tab_switches, tab_switch_log
            ) VALUES ($1, $2, $3, $4, 'in_progress', $5, $6, '{{}}'::jsonb, $7, $8, 0, 0, 0, '[]'::jsonb)
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(attempt.id)
        .bind(attempt.quiz_id)
        .bind(attempt.student_id)
        .bind(attempt.attempt_number)
        .bind(Json(&attempt.snapshot))
        .bind(attempt.shuffle_seed.map(|s| s as i64))
        .bind(attempt.started_at)
        .bind(attempt.deadline_at)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(e) if violates(&e, ACTIVE_ATTEMPT_INDEX) || violates(&e, ATTEMPT_NUMBER_INDEX) => {
                return Err(Error::DuplicateActiveAttempt)
            }
            Err(e) => return Err(e.into()),
        };
        let created = attempt_from_row(&row)?;
        tx.commit().await?;
        Ok(created)
    }

    async fn load_attempt(&self, attempt_id: Uuid) -> Result<Attempt> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM quiz_attempts WHERE id = $1",
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::AttemptNotFound(attempt_id))?;
        attempt_from_row(&row)
    }

    async fn find_active(&self, student_id: Uuid, quiz_id: Uuid) -> Result<Option<Attempt>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM quiz_attempts WHERE student_id = $1 AND quiz_id = $2 AND status = 'in_progress'",
            ATTEMPT_COLUMNS
        ))
        .bind(student_id)
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(attempt_from_row).transpose()
    }

    async fn list_attempts(&self, student_id: Uuid, quiz_id: Uuid) -> Result<Vec<Attempt>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM quiz_attempts WHERE student_id = $1 AND quiz_id = $2 ORDER BY attempt_number ASC",
            ATTEMPT_COLUMNS
        ))
        .bind(student_id)
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(attempt_from_row).collect()
    }

    async fn upsert_answer(
        &self,
        attempt_id: Uuid,
        question_id: Uuid,
        entry: AnswerEntry,
    ) -> Result<()> {
        // Field-level upsert: concurrent saves for other questions are kept.
        let updated = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET answers = jsonb_set(answers, ARRAY[$2::text], $3, true), updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(attempt_id)
        .bind(question_id.to_string())
        .bind(Json(&entry))
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.not_in_progress(attempt_id).await);
        }
        Ok(())
    }

    async fn record_tab_switch(&self, attempt_id: Uuid, entry: TabSwitchEntry) -> Result<i32> {
        let row = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET tab_switches = tab_switches + 1,
                tab_switch_log = tab_switch_log || jsonb_build_array($2::jsonb),
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
            RETURNING tab_switches
            "#,
        )
        .bind(attempt_id)
        .bind(Json(&entry))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_get("tab_switches")?),
            None => Err(self.not_in_progress(attempt_id).await),
        }
    }

    async fn mark_submitted(
        &self,
        attempt_id: Uuid,
        submitted_at: DateTime<Utc>,
        reason: SubmitReason,
    ) -> Result<Attempt> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE quiz_attempts
            SET status = 'submitted', submitted_at = $2, submit_reason = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .bind(submitted_at)
        .bind(reason.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => attempt_from_row(&row),
            None => Err(self.not_in_progress(attempt_id).await),
        }
    }

    async fn mark_evaluated(
        &self,
        attempt: &Attempt,
        evaluated_at: DateTime<Utc>,
    ) -> Result<Attempt> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE quiz_attempts
            SET status = 'evaluated', answers = $2, total_score = $3, percentage = $4,
                evaluated_at = $5, updated_at = NOW()
            WHERE id = $1 AND status = 'submitted'
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(attempt.id)
        .bind(Json(&attempt.answers))
        .bind(attempt.total_score)
        .bind(attempt.percentage)
        .bind(evaluated_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return attempt_from_row(&row);
        }
        let current = self.load_attempt(attempt.id).await?;
        match current.status {
            AttemptStatus::Evaluated => Ok(current),
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
        let mut tx = self.pool.begin().await?;

        let status: String =
            sqlx::query_scalar("SELECT status FROM quiz_attempts WHERE id = $1 FOR UPDATE")
                .bind(attempt_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(Error::AttemptNotFound(attempt_id))?;
        let from: AttemptStatus = status.parse()?;
        if !from.can_transition_to(AttemptStatus::Voided) {
            return Err(Error::InvalidTransition {
                from,
                to: AttemptStatus::Voided,
            });
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE quiz_attempts
            SET status = 'voided', voided_at = $2, void_reason = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .bind(at)
        .bind(reason)
        .fetch_one(&mut *tx)
        .await?;
        let voided = attempt_from_row(&row)?;

        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, actor_id, action, entity_type, entity_id, changes, created_at)
            VALUES ($1, $2, 'void_attempt', 'quiz_attempt', $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(actor_id)
        .bind(attempt_id)
        .bind(json!({ "from": from, "to": AttemptStatus::Voided, "reason": reason }))
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(voided)
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id FROM quiz_attempts
            WHERE status = 'in_progress' AND deadline_at <= $1
            ORDER BY deadline_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl ResultStore for PgStore {
    async fn insert_result(&self, result: &QuizResult) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO quiz_results (
                id, quiz_id, student_id, attempt_id, total_score, max_score, percentage,
                is_passed, passing_marks, correct_answers, incorrect_answers, unanswered,
                time_taken_seconds, submitted_at, rank, remarks, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(result.id)
        .bind(result.quiz_id)
        .bind(result.student_id)
        .bind(result.attempt_id)
        .bind(result.total_score)
        .bind(result.max_score)
        .bind(result.percentage)
        .bind(result.is_passed)
        .bind(result.passing_marks)
        .bind(result.correct_answers)
        .bind(result.incorrect_answers)
        .bind(result.unanswered)
        .bind(result.time_taken_seconds)
        .bind(result.submitted_at)
        .bind(result.rank)
        .bind(result.remarks.clone())
        .bind(result.created_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(e) if violates(&e, RESULT_ATTEMPT_CONSTRAINT) => {
                Err(Error::ResultAlreadyExists(result.attempt_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn result_for_attempt(&self, attempt_id: Uuid) -> Result<Option<QuizResult>> {
        let result = sqlx::query_as::<_, QuizResult>(
            r#"
            SELECT id, quiz_id, student_id, attempt_id, total_score, max_score, percentage,
                   is_passed, passing_marks, correct_answers, incorrect_answers, unanswered,
                   time_taken_seconds, submitted_at, rank, remarks, created_at
            FROM quiz_results WHERE attempt_id = $1
            "#,
        )
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(result)
    }
}
