use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[serde(alias = "single-choice", alias = "single", alias = "mcq")]
    SingleChoice,
    #[serde(alias = "multi-choice", alias = "multiple", alias = "multiple_choice")]
    MultiChoice,
    #[serde(alias = "true-false", alias = "truefalse", alias = "boolean")]
    TrueFalse,
    #[serde(alias = "short-answer", alias = "text")]
    ShortAnswer,
}

impl QuestionType {
    pub fn is_choice(self) -> bool {
        !matches!(self, QuestionType::ShortAnswer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
    pub is_correct: bool,
}

/// Canonical in-memory question. Options are always an ordered list; any
/// legacy storage shape is converted by [`QuestionRecord::normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub question_type: QuestionType,
    pub text: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Reference answer, only meaningful for short-answer questions.
    #[serde(default)]
    pub correct_answer: Option<String>,
    pub marks: Decimal,
    pub order_number: i32,
}

impl Question {
    pub fn option(&self, option_id: &str) -> Option<&QuestionOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    pub fn correct_option_ids(&self) -> impl Iterator<Item = &str> {
        self.options
            .iter()
            .filter(|o| o.is_correct)
            .map(|o| o.id.as_str())
    }
}

/// A question row as stored by the catalog. `options` may be the canonical
/// list, a list of bare strings, or an object keyed by option letter.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuestionRecord {
    pub id: Uuid,
    pub question_type: String,
    pub question_text: String,
    pub options: Option<sqlx::types::Json<JsonValue>>,
    pub correct_answer: Option<String>,
    pub marks: Decimal,
    pub order_number: i32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOptions {
    List(Vec<RawOption>),
    Keyed(BTreeMap<String, String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOption {
    Full {
        #[serde(default)]
        id: Option<String>,
        text: String,
        #[serde(default, alias = "isCorrect")]
        is_correct: bool,
    },
    Text(String),
}

fn letter_id(index: usize) -> String {
    if index < 26 {
        ((b'A' + index as u8) as char).to_string()
    } else {
        format!("OPT{}", index + 1)
    }
}

/// A key names an option by id; only when no id matches is it compared
/// against option texts.
fn mark_keyed_correct(options: &mut [QuestionOption], keys: &[String]) {
    for key in keys {
        let by_id = options.iter().any(|o| o.id.to_lowercase() == *key);
        for option in options.iter_mut() {
            let hit = if by_id {
                option.id.to_lowercase() == *key
            } else {
                option.text.trim().to_lowercase() == *key
            };
            if hit {
                option.is_correct = true;
            }
        }
    }
}

impl QuestionRecord {
    pub fn normalize(self) -> Result<Question> {
        let question_type: QuestionType =
            serde_json::from_value(JsonValue::String(self.question_type.clone())).map_err(|_| {
                Error::Internal(format!(
                    "question {} has unknown type '{}'",
                    self.id, self.question_type
                ))
            })?;

        if self.marks < Decimal::ZERO {
            return Err(Error::Internal(format!(
                "question {} has negative marks",
                self.id
            )));
        }

        if !question_type.is_choice() {
            return Ok(Question {
                id: self.id,
                question_type,
                text: self.question_text,
                options: Vec::new(),
                correct_answer: self.correct_answer,
                marks: self.marks,
                order_number: self.order_number,
            });
        }

        // Legacy records name the correct option(s) in `correct_answer`,
        // possibly comma separated.
        let correct_keys: Vec<String> = self
            .correct_answer
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let raw = match self.options {
            Some(sqlx::types::Json(value)) if !value.is_null() => {
                Some(serde_json::from_value::<RawOptions>(value).map_err(|e| {
                    Error::Internal(format!("question {} has malformed options: {}", self.id, e))
                })?)
            }
            _ => None,
        };

        let mut options: Vec<QuestionOption> = match raw {
            Some(RawOptions::List(items)) => items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| match item {
                    RawOption::Full {
                        id,
                        text,
                        is_correct,
                    } => QuestionOption {
                        id: id.unwrap_or_else(|| letter_id(idx)),
                        text,
                        is_correct,
                    },
                    RawOption::Text(text) => QuestionOption {
                        id: letter_id(idx),
                        text,
                        is_correct: false,
                    },
                })
                .collect(),
            Some(RawOptions::Keyed(map)) => map
                .into_iter()
                .map(|(key, text)| QuestionOption {
                    id: key,
                    text,
                    is_correct: false,
                })
                .collect(),
            None => Vec::new(),
        };

        if options.is_empty() && question_type == QuestionType::TrueFalse {
            options = [("true", "True"), ("false", "False")]
                .into_iter()
                .map(|(id, text)| QuestionOption {
                    id: id.to_string(),
                    text: text.to_string(),
                    is_correct: false,
                })
                .collect();
        }

        mark_keyed_correct(&mut options, &correct_keys);

        Ok(Question {
            id: self.id,
            question_type,
            text: self.question_text,
            options,
            correct_answer: None,
            marks: self.marks,
            order_number: self.order_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(question_type: &str, options: JsonValue, correct: Option<&str>) -> QuestionRecord {
        QuestionRecord {
            id: Uuid::new_v4(),
            question_type: question_type.to_string(),
            question_text: "Capital of France?".to_string(),
            options: Some(sqlx::types::Json(options)),
            correct_answer: correct.map(str::to_string),
            marks: Decimal::ONE,
            order_number: 1,
        }
    }

    #[test]
    fn canonical_list_is_kept() {
        let q = record(
            "single_choice",
            json!([
                {"id": "a1", "text": "Paris", "isCorrect": true},
                {"id": "a2", "text": "Rome", "is_correct": false}
            ]),
            None,
        )
        .normalize()
        .unwrap();
        assert_eq!(q.question_type, QuestionType::SingleChoice);
        assert_eq!(q.correct_option_ids().collect::<Vec<_>>(), vec!["a1"]);
        assert_eq!(q.options[1].text, "Rome");
    }

    #[test]
    fn keyed_object_is_normalized_in_letter_order() {
        let q = record(
            "multi-choice",
            json!({"C": "Berlin", "A": "Paris", "B": "Rome"}),
            Some("A, C"),
        )
        .normalize()
        .unwrap();
        let ids: Vec<_> = q.options.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(q.correct_option_ids().collect::<Vec<_>>(), vec!["A", "C"]);
        assert!(q.correct_answer.is_none());
    }

    #[test]
    fn bare_string_list_gets_letter_ids() {
        let q = record("single", json!(["Paris", "Rome"]), Some("paris"))
            .normalize()
            .unwrap();
        assert_eq!(q.options[0].id, "A");
        assert!(q.options[0].is_correct);
        assert!(!q.options[1].is_correct);
    }

    #[test]
    fn key_matches_option_id_before_text() {
        let q = record("single_choice", json!(["B", "A"]), Some("A"))
            .normalize()
            .unwrap();
        assert_eq!(q.correct_option_ids().collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(q.options[0].text, "B");
        assert!(q.options[0].is_correct);
        assert!(!q.options[1].is_correct);
    }

    #[test]
    fn true_false_without_options_is_synthesized() {
        let mut rec = record("true_false", JsonValue::Null, Some("false"));
        rec.options = None;
        let q = rec.normalize().unwrap();
        assert_eq!(q.options.len(), 2);
        assert_eq!(q.correct_option_ids().collect::<Vec<_>>(), vec!["false"]);
    }

    #[test]
    fn short_answer_keeps_reference() {
        let mut rec = record("short_answer", JsonValue::Null, Some("Paris"));
        rec.options = None;
        let q = rec.normalize().unwrap();
        assert!(q.options.is_empty());
        assert_eq!(q.correct_answer.as_deref(), Some("Paris"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = record("essay", json!([]), None).normalize().unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
