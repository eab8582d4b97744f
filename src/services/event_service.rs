use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use sqlx::PgPool;

use crate::error::Result;
use crate::models::attempt_event::{AttemptEvent, OutboxEvent};
use crate::store::EventSink;
use crate::utils::crypto::sign_payload;

const DEFAULT_MAX_DELIVERIES: i32 = 5;

/// Persists attempt events to the `attempt_events` outbox and pushes them
/// to the configured webhook.
#[derive(Clone)]
pub struct EventService {
    pool: PgPool,
    client: Client,
    target_url: Option<String>,
    secret: Option<String>,
}

impl EventService {
    pub fn new(pool: PgPool, target_url: Option<String>, secret: Option<String>) -> Self {
        Self {
            pool,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            target_url,
            secret,
        }
    }

    pub fn delivery_enabled(&self) -> bool {
        self.target_url.is_some()
    }

    /// Wire form of an event, as stored and as posted.
    pub fn payload(event: &AttemptEvent) -> serde_json::Value {
        json!({
            "id": event.id,
            "type": event.kind.as_str(),
            "attempt_id": event.attempt_id,
            "quiz_id": event.quiz_id,
            "student_id": event.student_id,
            "occurred_at": event.occurred_at,
            "data": event.data,
        })
    }

    pub async fn enqueue(&self, event: &AttemptEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO attempt_events (id, event_type, payload, max_attempts, status)
            VALUES ($1, $2, $3, $4, 'pending')
            "#,
        )
        .bind(event.id)
        .bind(event.kind.as_str())
        .bind(Self::payload(event))
        .bind(DEFAULT_MAX_DELIVERIES)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Claims and delivers the oldest due event. Returns `false` when there
    /// was nothing to deliver.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(target_url) = self.target_url.as_deref() else {
            return Ok(false);
        };

        // The claim bumps the delivery count and pushes the retry time out, so
        // a crashed worker's event becomes due again on its own.
        let claimed = sqlx::query_as::<_, OutboxEvent>(
            r#"
            UPDATE attempt_events
            SET attempts = attempts + 1,
                next_retry_at = NOW() + make_interval(secs => LEAST(3600, 30 * power(2::float, attempts)::int)),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM attempt_events
                WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, event_type, payload, http_status, response_body, attempts,
                      max_attempts, next_retry_at, status, created_at
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(event) = claimed else {
            return Ok(false);
        };
        self.deliver(target_url, &event).await?;
        Ok(true)
    }

    async fn deliver(&self, target_url: &str, event: &OutboxEvent) -> Result<()> {
        let body = serde_json::to_vec(&event.payload)?;
        let mut request = self
            .client
            .post(target_url)
            .header("Content-Type", "application/json")
            .header("X-Event-Type", event.event_type.as_str());
        if let Some(signature) = self.secret.as_deref().and_then(|s| sign_payload(s, &body)) {
            request = request.header("X-Event-Signature", signature);
        }

        let (http_status, response_body, delivered) = match request.body(body).send().await {
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                (Some(status.as_u16() as i32), text, status.is_success())
            }
            Err(err) => (None, err.to_string(), false),
        };

        let status = if delivered {
            "delivered"
        } else if event.attempts >= event.max_attempts {
            "failed"
        } else {
            "pending"
        };

        sqlx::query(
            r#"
            UPDATE attempt_events
            SET http_status = $1, response_body = $2, status = $3, updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(http_status)
        .bind(&response_body)
        .bind(status)
        .bind(event.id)
        .execute(&self.pool)
        .await?;

        match status {
            "delivered" => tracing::debug!(event_id = %event.id, event_type = %event.event_type, "event delivered"),
            "failed" => tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                attempts = event.attempts,
                http_status = ?http_status,
                "event delivery abandoned"
            ),
            _ => tracing::warn!(
                event_id = %event.id,
                attempts = event.attempts,
                http_status = ?http_status,
                "event delivery failed, will retry"
            ),
        }
        Ok(())
    }
}

#[async_trait]
impl EventSink for EventService {
    async fn emit(&self, event: AttemptEvent) -> Result<()> {
        self.enqueue(&event).await
    }
}
