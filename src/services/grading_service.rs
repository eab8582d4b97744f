use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::answer::Answer;
use crate::models::question::{Question, QuestionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Correct,
    /// Answered, but wrong.
    Incorrect,
    Unanswered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOutcome {
    pub question_id: Uuid,
    pub grade: Grade,
    pub marks_obtained: Decimal,
    pub max_marks: Decimal,
    /// The stored answer did not fit the question type.
    pub malformed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub per_question: Vec<QuestionOutcome>,
    pub total_score: Decimal,
    pub max_score: Decimal,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub unanswered_count: u32,
}

impl Evaluation {
    /// `total / max * 100`, rounded to two places. A quiz worth nothing
    /// scores 0.
    pub fn percentage(&self) -> Decimal {
        if self.max_score.is_zero() {
            return Decimal::ZERO;
        }
        (self.total_score / self.max_score * Decimal::ONE_HUNDRED)
            .round_dp(2)
            .normalize()
    }

    pub fn is_passed(&self, passing_marks: Decimal) -> bool {
        !self.max_score.is_zero() && self.total_score >= passing_marks
    }

    pub fn outcome(&self, question_id: Uuid) -> Option<&QuestionOutcome> {
        self.per_question.iter().find(|o| o.question_id == question_id)
    }
}

pub struct GradingService;

impl GradingService {
    /// Grades every frozen question against the recorded answers. Pure: the
    /// same inputs always produce the same evaluation, so a failed
    /// evaluation can simply be run again.
    pub fn evaluate(questions: &[Question], answers: &BTreeMap<Uuid, Answer>) -> Evaluation {
        let mut per_question = Vec::with_capacity(questions.len());
        let mut total_score = Decimal::ZERO;
        let mut max_score = Decimal::ZERO;
        let (mut correct_count, mut incorrect_count, mut unanswered_count) = (0u32, 0u32, 0u32);

        for q in questions {
            max_score += q.marks;
            let answer = answers.get(&q.id);

            let (grade, malformed) = match Self::grade_question(q, answer) {
                Ok(grade) => (grade, false),
                Err(err) => {
                    tracing::warn!(question_id = %q.id, error = %err, "ungradable answer");
                    // An empty malformed answer is still just unanswered.
                    let grade = match answer {
                        Some(a) if !a.is_blank() => Grade::Incorrect,
                        _ => Grade::Unanswered,
                    };
                    (grade, true)
                }
            };

            let marks_obtained = if grade == Grade::Correct {
                q.marks
            } else {
                Decimal::ZERO
            };
            total_score += marks_obtained;
            match grade {
                Grade::Correct => correct_count += 1,
                Grade::Incorrect => incorrect_count += 1,
                Grade::Unanswered => unanswered_count += 1,
            }

            per_question.push(QuestionOutcome {
                question_id: q.id,
                grade,
                marks_obtained,
                max_marks: q.marks,
                malformed,
            });
        }

        Evaluation {
            per_question,
            total_score,
            max_score,
            correct_count,
            incorrect_count,
            unanswered_count,
        }
    }

    fn grade_question(q: &Question, answer: Option<&Answer>) -> Result<Grade> {
        let Some(answer) = answer else {
            return Ok(Grade::Unanswered);
        };
        if !answer.fits(q.question_type) {
            return Err(Error::MalformedAnswer(format!(
                "{:?} answer given for {:?} question",
                answer, q.question_type
            )));
        }
        if answer.is_blank() {
            return Ok(Grade::Unanswered);
        }

        let correct = match (q.question_type, answer) {
            (QuestionType::SingleChoice | QuestionType::TrueFalse, Answer::SingleChoice { option_id }) => q
                .option(option_id.trim())
                .map(|o| o.is_correct)
                .unwrap_or(false),
            (QuestionType::MultiChoice, Answer::MultiChoice { option_ids }) => {
                let selected: BTreeSet<&str> = option_ids
                    .iter()
                    .map(|id| id.trim())
                    .filter(|id| !id.is_empty())
                    .collect();
                let expected: BTreeSet<&str> = q.correct_option_ids().collect();
                selected == expected
            }
            (QuestionType::ShortAnswer, Answer::Text { text }) => q
                .correct_answer
                .as_deref()
                .map(|reference| normalize_text(reference) == normalize_text(text))
                .unwrap_or(false),
            (question_type, _) => {
                return Err(Error::MalformedAnswer(format!(
                    "answer does not fit {:?} question",
                    question_type
                )))
            }
        };

        Ok(if correct { Grade::Correct } else { Grade::Incorrect })
    }
}

fn normalize_text(s: &str) -> String {
    s.trim().to_lowercase()
}
