//! Row shapes as stored in Postgres, and their conversion into domain types.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{
    CreditTransaction, Organization, TopUpClaim, TopUpClaimStatus, TransactionMetadata,
    WebhookEventRecord, WebhookEventStatus,
};
use crate::ports::RepositoryError;

#[derive(Debug, Clone, FromRow)]
pub struct OrganizationRow {
    pub id: Uuid,
    pub name: String,
    pub credit_balance: BigDecimal,
    pub auto_top_up_enabled: bool,
    pub credit_threshold: BigDecimal,
    pub auto_top_up_amount: BigDecimal,
    pub payment_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            credit_balance: row.credit_balance,
            auto_top_up_enabled: row.auto_top_up_enabled,
            credit_threshold: row.credit_threshold,
            auto_top_up_amount: row.auto_top_up_amount,
            payment_customer_id: row.payment_customer_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CreditTransactionRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub amount: BigDecimal,
    #[sqlx(rename = "type")]
    pub transaction_type: String,
    pub description: String,
    pub balance_after: Option<BigDecimal>,
    pub payment_intent_id: Option<String>,
    pub transaction_hash: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<CreditTransactionRow> for CreditTransaction {
    type Error = RepositoryError;

    fn try_from(row: CreditTransactionRow) -> Result<Self, Self::Error> {
        let transaction_type = row
            .transaction_type
            .parse()
            .map_err(|e: crate::domain::credit_transaction::UnknownTransactionType| {
                RepositoryError::InvariantViolation(e.to_string())
            })?;
        let metadata: TransactionMetadata = serde_json::from_value(row.metadata)?;

        Ok(Self {
            id: row.id,
            organization_id: row.organization_id,
            user_id: row.user_id,
            amount: row.amount,
            transaction_type,
            description: row.description,
            balance_after: row.balance_after,
            payment_intent_id: row.payment_intent_id,
            transaction_hash: row.transaction_hash,
            metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WebhookEventRow {
    pub event_id: String,
    pub organization_id: Uuid,
    pub event_type: String,
    pub status: String,
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<WebhookEventRow> for WebhookEventRecord {
    type Error = RepositoryError;

    fn try_from(row: WebhookEventRow) -> Result<Self, Self::Error> {
        let status = WebhookEventStatus::parse(&row.status).ok_or_else(|| {
            RepositoryError::InvariantViolation(format!("unknown webhook status {}", row.status))
        })?;
        Ok(Self {
            event_id: row.event_id,
            organization_id: row.organization_id,
            event_type: row.event_type,
            status,
            error: row.error,
            received_at: row.received_at,
            processed_at: row.processed_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TopUpClaimRow {
    pub organization_id: Uuid,
    pub status: String,
    pub payment_intent_id: Option<String>,
    pub claimed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<TopUpClaimRow> for TopUpClaim {
    type Error = RepositoryError;

    fn try_from(row: TopUpClaimRow) -> Result<Self, Self::Error> {
        let status = TopUpClaimStatus::parse(&row.status).ok_or_else(|| {
            RepositoryError::InvariantViolation(format!("unknown top-up status {}", row.status))
        })?;
        Ok(Self {
            organization_id: row.organization_id,
            status,
            payment_intent_id: row.payment_intent_id,
            claimed_at: row.claimed_at,
            resolved_at: row.resolved_at,
        })
    }
}
