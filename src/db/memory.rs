//! In-process implementation of the billing ports.
//!
//! All state sits behind one async mutex, so every port method is atomic with
//! respect to every other. Only correct when a single process owns the data:
//! use the Postgres stores for any multi-instance deployment.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    CreditTransaction, LedgerCredit, Organization, PaymentVerification, ProcessingOutcome,
    ProcessingStats, TopUpClaim, TopUpClaimStatus, TopUpResolution, TransactionMetadata,
    TransactionType, WebhookEvent, WebhookEventRecord, WebhookEventStatus,
};
use crate::ports::{CreditLedger, RepositoryError, TopUpClaimStore, WebhookEventStore};

#[derive(Default)]
struct State {
    organizations: HashMap<Uuid, Organization>,
    transactions: Vec<CreditTransaction>,
    webhook_events: HashMap<String, WebhookEventRecord>,
    top_up_claims: HashMap<Uuid, TopUpClaim>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_organization(&self, organization: Organization) {
        let mut state = self.state.lock().await;
        state.organizations.insert(organization.id, organization);
    }
}

fn credit_balance(
    org: &mut Organization,
    amount: &BigDecimal,
    now: DateTime<Utc>,
) -> Result<BigDecimal, RepositoryError> {
    let new_balance = &org.credit_balance + amount;
    if new_balance < BigDecimal::from(0) {
        return Err(RepositoryError::InvariantViolation(format!(
            "balance of organization {} would become {}",
            org.id, new_balance
        )));
    }
    org.credit_balance = new_balance.clone();
    org.updated_at = now;
    Ok(new_balance)
}

#[async_trait]
impl WebhookEventStore for MemoryStore {
    async fn claim(
        &self,
        event: &WebhookEvent,
        received_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.webhook_events.contains_key(&event.id) {
            return Ok(false);
        }
        state.webhook_events.insert(
            event.id.clone(),
            WebhookEventRecord {
                event_id: event.id.clone(),
                organization_id: event.organization_id,
                event_type: event.event_type.clone(),
                status: WebhookEventStatus::Processing,
                error: None,
                received_at,
                processed_at: None,
            },
        );
        Ok(true)
    }

    async fn record_outcome(
        &self,
        event_id: &str,
        outcome: &ProcessingOutcome,
        processed_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let record = state
            .webhook_events
            .get_mut(event_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("webhook event {}", event_id)))?;
        record.status = outcome.status();
        record.error = outcome.error().map(str::to_string);
        record.processed_at = Some(processed_at);
        Ok(())
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<WebhookEventRecord>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.webhook_events.get(event_id).cloned())
    }

    async fn processing_stats(&self) -> Result<ProcessingStats, RepositoryError> {
        let state = self.state.lock().await;
        let mut stats = ProcessingStats::default();
        for record in state.webhook_events.values() {
            match record.status {
                WebhookEventStatus::Processing => stats.in_flight += 1,
                WebhookEventStatus::Succeeded => stats.total_processed += 1,
                WebhookEventStatus::Failed => {
                    stats.total_processed += 1;
                    stats.failed_processed += 1;
                }
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl CreditLedger for MemoryStore {
    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.organizations.get(&id).cloned())
    }

    async fn list_auto_top_up_organizations(&self) -> Result<Vec<Organization>, RepositoryError> {
        let state = self.state.lock().await;
        let mut orgs: Vec<Organization> = state
            .organizations
            .values()
            .filter(|o| o.auto_top_up_enabled)
            .cloned()
            .collect();
        orgs.sort_by_key(|o| o.created_at);
        Ok(orgs)
    }

    async fn apply_credit(
        &self,
        organization_id: Uuid,
        credit: LedgerCredit,
    ) -> Result<CreditTransaction, RepositoryError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let org = state
            .organizations
            .get_mut(&organization_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("organization {}", organization_id)))?;
        let new_balance = credit_balance(org, &credit.amount, now)?;
        let entry = credit.into_transaction(organization_id, new_balance, now);
        state.transactions.push(entry.clone());
        Ok(entry)
    }

    async fn insert_transaction(&self, tx: &CreditTransaction) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.organizations.contains_key(&tx.organization_id) {
            return Err(RepositoryError::NotFound(format!(
                "organization {}",
                tx.organization_id
            )));
        }
        state.transactions.push(tx.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<CreditTransaction>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn list_transactions(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<CreditTransaction>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn finalize_crypto_payment(
        &self,
        payment_id: Uuid,
        verification: &PaymentVerification,
        now: DateTime<Utc>,
    ) -> Result<Option<CreditTransaction>, RepositoryError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let Some(tx) = state
            .transactions
            .iter_mut()
            .find(|t| t.id == payment_id && t.transaction_type == TransactionType::CryptoPending)
        else {
            return Ok(None);
        };

        let details = match &tx.metadata {
            TransactionMetadata::CryptoPending(details) => details.clone(),
            _ => {
                return Err(RepositoryError::InvariantViolation(format!(
                    "crypto_pending row {} has non-crypto metadata",
                    payment_id
                )))
            }
        };
        if now > details.expires_at {
            return Ok(None);
        }

        let org = state
            .organizations
            .get_mut(&tx.organization_id)
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("organization {}", tx.organization_id))
            })?;
        let new_balance = credit_balance(org, &verification.amount, now)?;

        tx.transaction_type = TransactionType::Purchase;
        tx.amount = verification.amount.clone();
        tx.balance_after = Some(new_balance);
        tx.transaction_hash = Some(verification.transaction_hash.clone());
        tx.description = format!(
            "Crypto purchase of ${} ({} on {})",
            verification.amount, details.currency, details.network
        );
        tx.metadata = TransactionMetadata::CryptoConfirmed {
            details,
            confirmations: verification.confirmations,
            block_number: verification.block_number,
        };

        Ok(Some(tx.clone()))
    }

    async fn expire_crypto_payments(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, RepositoryError> {
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();
        for tx in state
            .transactions
            .iter_mut()
            .filter(|t| t.transaction_type == TransactionType::CryptoPending)
        {
            let details = match &tx.metadata {
                TransactionMetadata::CryptoPending(details) if details.expires_at < now => {
                    details.clone()
                }
                _ => continue,
            };
            tx.transaction_type = TransactionType::CryptoExpired;
            tx.metadata = TransactionMetadata::CryptoExpired {
                details,
                expired_at: now,
            };
            expired.push(tx.id);
        }
        Ok(expired)
    }
}

#[async_trait]
impl TopUpClaimStore for MemoryStore {
    async fn try_claim(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.top_up_claims.get(&organization_id) {
            if existing.blocks(now, cooldown) {
                return Ok(false);
            }
        }
        state.top_up_claims.insert(
            organization_id,
            TopUpClaim {
                organization_id,
                status: TopUpClaimStatus::InFlight,
                payment_intent_id: None,
                claimed_at: now,
                resolved_at: None,
            },
        );
        Ok(true)
    }

    async fn attach_intent(
        &self,
        organization_id: Uuid,
        payment_intent_id: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let claim = state
            .top_up_claims
            .get_mut(&organization_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("top-up claim {}", organization_id)))?;
        claim.payment_intent_id = Some(payment_intent_id.to_string());
        Ok(())
    }

    async fn release(
        &self,
        organization_id: Uuid,
        payment_intent_id: Option<&str>,
        resolution: TopUpResolution,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if let Some(claim) = state.top_up_claims.get_mut(&organization_id) {
            let intent_matches = match payment_intent_id {
                Some(wanted) => claim.payment_intent_id.as_deref() == Some(wanted),
                None => true,
            };
            if claim.status == TopUpClaimStatus::InFlight && intent_matches {
                claim.status = resolution.into();
                claim.resolved_at = Some(now);
            }
        }
        Ok(())
    }

    async fn get_claim(&self, organization_id: Uuid) -> Result<Option<TopUpClaim>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.top_up_claims.get(&organization_id).cloned())
    }
}
