use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::answer::{Answer, AnswerEntry};
use crate::models::question::{Question, QuestionType};
use crate::models::quiz::Quiz;
use crate::services::grading_service::{Evaluation, Grade};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Evaluated,
    /// Terminal state set only by an administrative invalidation.
    Voided,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Submitted => "submitted",
            AttemptStatus::Evaluated => "evaluated",
            AttemptStatus::Voided => "voided",
        }
    }

    /// Legal forward transitions. Voiding is allowed from any other state.
    pub fn can_transition_to(self, next: AttemptStatus) -> bool {
        matches!(
            (self, next),
            (AttemptStatus::InProgress, AttemptStatus::Submitted)
                | (AttemptStatus::Submitted, AttemptStatus::Evaluated)
                | (AttemptStatus::InProgress, AttemptStatus::Voided)
                | (AttemptStatus::Submitted, AttemptStatus::Voided)
                | (AttemptStatus::Evaluated, AttemptStatus::Voided)
        )
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_progress" => Ok(AttemptStatus::InProgress),
            "submitted" => Ok(AttemptStatus::Submitted),
            "evaluated" => Ok(AttemptStatus::Evaluated),
            "voided" => Ok(AttemptStatus::Voided),
            other => Err(Error::Internal(format!("unknown attempt status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitReason {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "tab-switch-policy")]
    TabSwitchPolicy,
}

impl SubmitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmitReason::User => "user",
            SubmitReason::Timeout => "timeout",
            SubmitReason::TabSwitchPolicy => "tab-switch-policy",
        }
    }
}

impl fmt::Display for SubmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmitReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(SubmitReason::User),
            "timeout" => Ok(SubmitReason::Timeout),
            "tab-switch-policy" => Ok(SubmitReason::TabSwitchPolicy),
            other => Err(Error::Internal(format!("unknown submit reason '{}'", other))),
        }
    }
}

/// Immutable copy of the quiz taken when the attempt starts. Grading only
/// ever reads from here, never from the live catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizSnapshot {
    pub title: String,
    pub duration_minutes: i32,
    pub passing_marks: Decimal,
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub questions: Vec<Question>,
}

impl QuizSnapshot {
    pub fn freeze(quiz: &Quiz, mut questions: Vec<Question>) -> Self {
        questions.sort_by_key(|q| q.order_number);
        Self {
            title: quiz.title.clone(),
            duration_minutes: quiz.duration_minutes,
            passing_marks: quiz.passing_marks,
            shuffle_questions: quiz.shuffle_questions,
            shuffle_options: quiz.shuffle_options,
            questions,
        }
    }

    pub fn question(&self, question_id: Uuid) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    pub fn needs_shuffle(&self) -> bool {
        self.shuffle_questions || self.shuffle_options
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabSwitchEntry {
    pub kind: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub student_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub snapshot: QuizSnapshot,
    pub shuffle_seed: Option<u64>,
    pub answers: BTreeMap<Uuid, AnswerEntry>,
    pub started_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub submit_reason: Option<SubmitReason>,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub total_score: Decimal,
    pub percentage: Decimal,
    pub tab_switches: i32,
    pub tab_switch_log: Vec<TabSwitchEntry>,
    pub voided_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
}

impl Attempt {
    pub fn is_in_progress(&self) -> bool {
        self.status == AttemptStatus::InProgress
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline_at
    }

    /// Submission time as seen by grading: a late call never extends the
    /// allotted duration.
    pub fn effective_submission_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.min(self.deadline_at).max(self.started_at)
    }

    pub fn time_remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        if !self.is_in_progress() {
            return 0;
        }
        (self.deadline_at - now).num_seconds().max(0)
    }

    pub fn answer_values(&self) -> BTreeMap<Uuid, Answer> {
        self.answers
            .iter()
            .map(|(id, entry)| (*id, entry.answer.clone()))
            .collect()
    }

    /// Copies the graded fields of an evaluation onto the stored answers.
    pub fn apply_evaluation(&mut self, evaluation: &Evaluation) {
        for outcome in &evaluation.per_question {
            if let Some(entry) = self.answers.get_mut(&outcome.question_id) {
                entry.is_correct = Some(outcome.grade == Grade::Correct);
                entry.marks_obtained = outcome.marks_obtained;
            }
        }
        self.total_score = evaluation.total_score;
        self.percentage = evaluation.percentage();
    }

    /// Questions in the order this attempt presents them, without any
    /// answer key material.
    pub fn presented_questions(&self) -> Vec<PresentedQuestion> {
        let mut questions: Vec<PresentedQuestion> = self
            .snapshot
            .questions
            .iter()
            .map(PresentedQuestion::from)
            .collect();

        let Some(seed) = self.shuffle_seed else {
            return questions;
        };
        let mut rng = StdRng::seed_from_u64(seed);
        if self.snapshot.shuffle_questions {
            questions.shuffle(&mut rng);
        }
        if self.snapshot.shuffle_options {
            for q in questions.iter_mut() {
                q.options.shuffle(&mut rng);
            }
        }
        questions
    }
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub student_id: Uuid,
    pub snapshot: QuizSnapshot,
    pub shuffle_seed: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
}

impl NewAttempt {
    pub fn new(quiz_id: Uuid, student_id: Uuid, snapshot: QuizSnapshot, now: DateTime<Utc>) -> Self {
        let shuffle_seed = snapshot.needs_shuffle().then(rand::random::<u64>);
        let deadline_at = now + Duration::minutes(snapshot.duration_minutes as i64);
        Self {
            id: Uuid::new_v4(),
            quiz_id,
            student_id,
            snapshot,
            shuffle_seed,
            started_at: now,
            deadline_at,
        }
    }

    pub fn into_attempt(self, attempt_number: i32) -> Attempt {
        Attempt {
            id: self.id,
            quiz_id: self.quiz_id,
            student_id: self.student_id,
            attempt_number,
            status: AttemptStatus::InProgress,
            snapshot: self.snapshot,
            shuffle_seed: self.shuffle_seed,
            answers: BTreeMap::new(),
            started_at: self.started_at,
            deadline_at: self.deadline_at,
            submitted_at: None,
            submit_reason: None,
            evaluated_at: None,
            total_score: Decimal::ZERO,
            percentage: Decimal::ZERO,
            tab_switches: 0,
            tab_switch_log: Vec::new(),
            voided_at: None,
            void_reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentedOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentedQuestion {
    pub id: Uuid,
    pub question_type: QuestionType,
    pub text: String,
    pub marks: Decimal,
    pub options: Vec<PresentedOption>,
}

impl From<&Question> for PresentedQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            question_type: q.question_type,
            text: q.text.clone(),
            marks: q.marks,
            options: q
                .options
                .iter()
                .map(|o| PresentedOption {
                    id: o.id.clone(),
                    text: o.text.clone(),
                })
                .collect(),
        }
    }
}
