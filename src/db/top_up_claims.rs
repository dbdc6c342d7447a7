use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::TopUpClaimRow;
use crate::domain::{TopUpClaim, TopUpClaimStatus, TopUpResolution};
use crate::ports::{RepositoryError, TopUpClaimStore};

/// One row per organization in `auto_top_up_claims`, flipped atomically.
#[derive(Clone)]
pub struct PgTopUpClaimStore {
    pool: PgPool,
}

impl PgTopUpClaimStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TopUpClaimStore for PgTopUpClaimStore {
    async fn try_claim(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool, RepositoryError> {
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO auto_top_up_claims (organization_id, status, claimed_at)
            VALUES ($1, 'in_flight', $2)
            ON CONFLICT (organization_id) DO UPDATE SET
                status = 'in_flight',
                claimed_at = EXCLUDED.claimed_at,
                payment_intent_id = NULL,
                resolved_at = NULL
            WHERE auto_top_up_claims.status <> 'in_flight'
               OR auto_top_up_claims.claimed_at <= $3
            RETURNING organization_id
            "#,
        )
        .bind(organization_id)
        .bind(now)
        .bind(now - cooldown)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn attach_intent(
        &self,
        organization_id: Uuid,
        payment_intent_id: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE auto_top_up_claims SET payment_intent_id = $2 WHERE organization_id = $1",
        )
        .bind(organization_id)
        .bind(payment_intent_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "top-up claim {}",
                organization_id
            )));
        }
        Ok(())
    }

    async fn release(
        &self,
        organization_id: Uuid,
        payment_intent_id: Option<&str>,
        resolution: TopUpResolution,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE auto_top_up_claims
            SET status = $2, resolved_at = $3
            WHERE organization_id = $1
              AND status = 'in_flight'
              AND ($4::text IS NULL OR payment_intent_id = $4)
            "#,
        )
        .bind(organization_id)
        .bind(TopUpClaimStatus::from(resolution).as_str())
        .bind(now)
        .bind(payment_intent_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_claim(&self, organization_id: Uuid) -> Result<Option<TopUpClaim>, RepositoryError> {
        let row = sqlx::query_as::<_, TopUpClaimRow>(
            r#"
            SELECT organization_id, status, payment_intent_id, claimed_at, resolved_at
            FROM auto_top_up_claims
            WHERE organization_id = $1
            "#,
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TopUpClaim::try_from).transpose()
    }
}
