use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::db::models::WebhookEventRow;
use crate::domain::{ProcessingOutcome, ProcessingStats, WebhookEvent, WebhookEventRecord};
use crate::ports::{RepositoryError, WebhookEventStore};

/// Webhook dedup table backed by the `webhook_events` primary key.
#[derive(Clone)]
pub struct PgWebhookEventStore {
    pool: PgPool,
}

impl PgWebhookEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventStore for PgWebhookEventStore {
    async fn claim(
        &self,
        event: &WebhookEvent,
        received_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        // The primary key on event_id is the arbiter: concurrent inserts for
        // the same id serialize on the index and all but one get no row back.
        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO webhook_events (event_id, organization_id, event_type, status, received_at)
            VALUES ($1, $2, $3, 'processing', $4)
            ON CONFLICT (event_id) DO NOTHING
            RETURNING event_id
            "#,
        )
        .bind(&event.id)
        .bind(event.organization_id)
        .bind(&event.event_type)
        .bind(received_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn record_outcome(
        &self,
        event_id: &str,
        outcome: &ProcessingOutcome,
        processed_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = $2, error = $3, processed_at = $4
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(outcome.status().as_str())
        .bind(outcome.error())
        .bind(processed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("webhook event {}", event_id)));
        }
        Ok(())
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<WebhookEventRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, WebhookEventRow>(
            r#"
            SELECT event_id, organization_id, event_type, status, error, received_at, processed_at
            FROM webhook_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WebhookEventRecord::try_from).transpose()
    }

    async fn processing_stats(&self) -> Result<ProcessingStats, RepositoryError> {
        let (total_processed, failed_processed, in_flight): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status <> 'processing'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COUNT(*) FILTER (WHERE status = 'processing')
            FROM webhook_events
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ProcessingStats {
            total_processed,
            failed_processed,
            in_flight,
        })
    }
}
