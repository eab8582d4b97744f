use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::question::QuestionType;

/// A student's response to one question. The shape is checked against the
/// question type only when grading; a mismatch is graded as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    SingleChoice { option_id: String },
    MultiChoice { option_ids: BTreeSet<String> },
    Text { text: String },
}

impl Answer {
    pub fn fits(&self, question_type: QuestionType) -> bool {
        matches!(
            (self, question_type),
            (
                Answer::SingleChoice { .. },
                QuestionType::SingleChoice | QuestionType::TrueFalse
            ) | (Answer::MultiChoice { .. }, QuestionType::MultiChoice)
                | (Answer::Text { .. }, QuestionType::ShortAnswer)
        )
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Answer::SingleChoice { option_id } => option_id.trim().is_empty(),
            Answer::MultiChoice { option_ids } => option_ids.iter().all(|id| id.trim().is_empty()),
            Answer::Text { text } => text.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub answer: Answer,
    pub answered_at: DateTime<Utc>,
    /// Filled on evaluation.
    #[serde(default)]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub marks_obtained: Decimal,
}

impl AnswerEntry {
    pub fn new(answer: Answer, answered_at: DateTime<Utc>) -> Self {
        Self {
            answer,
            answered_at,
            is_correct: None,
            marks_obtained: Decimal::ZERO,
        }
    }
}
