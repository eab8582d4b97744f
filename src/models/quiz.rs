use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Catalog quiz definition. Read-only to the attempt engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quiz {
    pub id: Uuid,
    pub title: String,
    pub duration_minutes: i32,
    pub max_attempts: i32,
    pub passing_marks: Decimal,
    pub total_marks: Decimal,
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_published: bool,
}

impl Quiz {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(0) as u32
    }

    pub fn check_available(&self, now: DateTime<Utc>) -> Result<()> {
        if !self.is_active {
            return Err(Error::QuizNotAvailable("quiz is not active".to_string()));
        }
        if !self.is_published {
            return Err(Error::QuizNotAvailable("quiz is not published".to_string()));
        }
        if let Some(start) = self.start_time {
            if now < start {
                return Err(Error::QuizNotAvailable("quiz has not opened yet".to_string()));
            }
        }
        if let Some(end) = self.end_time {
            if now > end {
                return Err(Error::QuizNotAvailable("quiz has closed".to_string()));
            }
        }
        if self.duration_minutes <= 0 {
            return Err(Error::QuizNotAvailable(
                "quiz has no time limit configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn quiz(now: DateTime<Utc>) -> Quiz {
        Quiz {
            id: Uuid::new_v4(),
            title: "Algebra".into(),
            duration_minutes: 10,
            max_attempts: 1,
            passing_marks: Decimal::ONE,
            total_marks: Decimal::TWO,
            shuffle_questions: false,
            shuffle_options: false,
            start_time: Some(now - Duration::hours(1)),
            end_time: Some(now + Duration::hours(1)),
            is_active: true,
            is_published: true,
        }
    }

    #[test]
    fn open_window_is_available() {
        let now = Utc::now();
        assert!(quiz(now).check_available(now).is_ok());
    }

    #[test]
    fn outside_window_or_unpublished_is_rejected() {
        let now = Utc::now();
        let q = quiz(now);
        assert!(matches!(
            q.check_available(now + Duration::hours(2)),
            Err(Error::QuizNotAvailable(_))
        ));
        assert!(matches!(
            q.check_available(now - Duration::hours(2)),
            Err(Error::QuizNotAvailable(_))
        ));

        let mut draft = quiz(now);
        draft.is_published = false;
        assert!(matches!(
            draft.check_available(now),
            Err(Error::QuizNotAvailable(_))
        ));
    }
}
