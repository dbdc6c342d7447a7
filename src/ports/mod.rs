//! Persistence seams used by the billing services.
//!
//! Every method that mutates shared state is a single atomic unit in the
//! backing store; the services never compose two writes themselves.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::{
    CreditTransaction, LedgerCredit, Organization, PaymentVerification, ProcessingOutcome,
    ProcessingStats, TopUpClaim, TopUpResolution, WebhookEvent, WebhookEventRecord,
};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Table of webhook event ids that have been seen.
#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    /// Inserts a `processing` record for the event. Returns `false` when a
    /// record with that id already exists; exactly one concurrent caller per
    /// id ever gets `true`.
    async fn claim(
        &self,
        event: &WebhookEvent,
        received_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn record_outcome(
        &self,
        event_id: &str,
        outcome: &ProcessingOutcome,
        processed_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn get_event(&self, event_id: &str) -> Result<Option<WebhookEventRecord>, RepositoryError>;

    async fn processing_stats(&self) -> Result<ProcessingStats, RepositoryError>;
}

/// Organizations and their append-only credit transactions.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>, RepositoryError>;

    /// Organizations with auto top-up switched on.
    async fn list_auto_top_up_organizations(&self) -> Result<Vec<Organization>, RepositoryError>;

    /// Adds `credit.amount` to the organization's balance and appends the
    /// matching ledger entry, serialized against every other balance change
    /// for the same organization.
    async fn apply_credit(
        &self,
        organization_id: Uuid,
        credit: LedgerCredit,
    ) -> Result<CreditTransaction, RepositoryError>;

    async fn insert_transaction(&self, tx: &CreditTransaction) -> Result<(), RepositoryError>;

    async fn get_transaction(&self, id: Uuid) -> Result<Option<CreditTransaction>, RepositoryError>;

    async fn list_transactions(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<CreditTransaction>, RepositoryError>;

    /// Turns a still-pending, unexpired crypto placeholder into a purchase and
    /// credits the organization, atomically. Returns `None` if the row was
    /// already finalized, expired, or is past its expiry at `now`.
    async fn finalize_crypto_payment(
        &self,
        payment_id: Uuid,
        verification: &PaymentVerification,
        now: DateTime<Utc>,
    ) -> Result<Option<CreditTransaction>, RepositoryError>;

    /// Flips every pending crypto row whose expiry is before `now` to
    /// `crypto_expired`. Returns the ids that were flipped by this call.
    async fn expire_crypto_payments(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, RepositoryError>;
}

/// Per-organization guard against re-triggering an auto top-up.
#[async_trait]
pub trait TopUpClaimStore: Send + Sync {
    /// Marks a top-up as in flight unless one already is and was claimed less
    /// than `cooldown` ago. Returns whether this caller won the claim.
    async fn try_claim(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool, RepositoryError>;

    async fn attach_intent(
        &self,
        organization_id: Uuid,
        payment_intent_id: &str,
    ) -> Result<(), RepositoryError>;

    /// Resolves the in-flight claim. When `payment_intent_id` is given, only a
    /// claim already bound to that intent is resolved; an unbound claim waits
    /// for `attach_intent` or lapses with the cooldown.
    async fn release(
        &self,
        organization_id: Uuid,
        payment_intent_id: Option<&str>,
        resolution: TopUpResolution,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn get_claim(&self, organization_id: Uuid) -> Result<Option<TopUpClaim>, RepositoryError>;
}
