use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "attempt.started")]
    AttemptStarted,
    #[serde(rename = "attempt.submitted")]
    AttemptSubmitted,
    #[serde(rename = "attempt.evaluated")]
    AttemptEvaluated,
    #[serde(rename = "attempt.voided")]
    AttemptVoided,
    #[serde(rename = "tab.switch.recorded")]
    TabSwitchRecorded,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::AttemptStarted => "attempt.started",
            EventKind::AttemptSubmitted => "attempt.submitted",
            EventKind::AttemptEvaluated => "attempt.evaluated",
            EventKind::AttemptVoided => "attempt.voided",
            EventKind::TabSwitchRecorded => "tab.switch.recorded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub attempt_id: Uuid,
    pub quiz_id: Uuid,
    pub student_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub data: JsonValue,
}

/// Outbox row awaiting delivery to the analytics/audit sink.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub payload: JsonValue,
    pub http_status: Option<i32>,
    pub response_body: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
