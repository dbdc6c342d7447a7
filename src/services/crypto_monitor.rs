//! On-chain payment tracking.
//!
//! A payment lives as a `crypto_pending` ledger row carrying its expected
//! amount and deadline. Confirmation and the expiry sweep both finalize that
//! row with a conditional update, so exactly one of them can win.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    CreditTransaction, CryptoPaymentDetails, PaymentStatusReport, PaymentVerification,
    StartCryptoPayment, StartedCryptoPayment,
};
use crate::error::BillingError;
use crate::ports::CreditLedger;

pub const DEFAULT_PAYMENT_EXPIRY_MINUTES: i64 = 30;

#[derive(Clone)]
pub struct CryptoPaymentMonitor {
    ledger: Arc<dyn CreditLedger>,
    payment_expiry: Duration,
}

impl CryptoPaymentMonitor {
    pub fn new(ledger: Arc<dyn CreditLedger>, payment_expiry: Duration) -> Self {
        Self {
            ledger,
            payment_expiry,
        }
    }

    pub async fn start_payment_monitoring(
        &self,
        request: StartCryptoPayment,
    ) -> Result<StartedCryptoPayment, BillingError> {
        self.start_payment_monitoring_at(request, Utc::now()).await
    }

    pub async fn start_payment_monitoring_at(
        &self,
        request: StartCryptoPayment,
        now: DateTime<Utc>,
    ) -> Result<StartedCryptoPayment, BillingError> {
        if request.amount <= BigDecimal::from(0) {
            return Err(BillingError::InvalidAmount(format!(
                "expected payment must be positive, got {}",
                request.amount
            )));
        }
        if self
            .ledger
            .get_organization(request.organization_id)
            .await?
            .is_none()
        {
            return Err(BillingError::OrganizationNotFound(request.organization_id));
        }

        let expires_at = now + self.payment_expiry;
        let placeholder = CreditTransaction::crypto_pending(
            request.organization_id,
            request.user_id,
            CryptoPaymentDetails {
                expected_usd: request.amount,
                wallet_address: request.wallet_address,
                network: request.network,
                currency: request.currency,
                expires_at,
            },
            now,
        );
        self.ledger.insert_transaction(&placeholder).await?;

        info!(
            payment_id = %placeholder.id,
            organization_id = %placeholder.organization_id,
            expires_at = %expires_at,
            "Crypto payment monitoring started"
        );

        Ok(StartedCryptoPayment {
            payment_id: placeholder.id,
            expires_at,
        })
    }

    pub async fn payment_status(&self, payment_id: Uuid) -> Result<PaymentStatusReport, BillingError> {
        self.payment_status_at(payment_id, Utc::now()).await
    }

    pub async fn payment_status_at(
        &self,
        payment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<PaymentStatusReport, BillingError> {
        self.ledger
            .get_transaction(payment_id)
            .await?
            .and_then(|tx| PaymentStatusReport::derive(&tx, now))
            .ok_or(BillingError::PaymentNotFound(payment_id))
    }

    /// Returns false when the payment was already finalized or has expired.
    pub async fn process_confirmed_payment(
        &self,
        payment_id: Uuid,
        verification: PaymentVerification,
    ) -> Result<bool, BillingError> {
        self.process_confirmed_payment_at(payment_id, verification, Utc::now())
            .await
    }

    pub async fn process_confirmed_payment_at(
        &self,
        payment_id: Uuid,
        verification: PaymentVerification,
        now: DateTime<Utc>,
    ) -> Result<bool, BillingError> {
        if verification.amount <= BigDecimal::from(0) {
            return Err(BillingError::InvalidAmount(format!(
                "verified amount must be positive, got {}",
                verification.amount
            )));
        }

        let finalized = self
            .ledger
            .finalize_crypto_payment(payment_id, &verification, now)
            .await?;

        if let Some(tx) = finalized {
            info!(
                payment_id = %payment_id,
                organization_id = %tx.organization_id,
                amount = %tx.amount,
                transaction_hash = %verification.transaction_hash,
                "Crypto payment confirmed"
            );
            return Ok(true);
        }

        match self.ledger.get_transaction(payment_id).await? {
            Some(tx) if tx.is_crypto() => {
                warn!(
                    payment_id = %payment_id,
                    transaction_type = %tx.transaction_type,
                    "Crypto payment already finalized or expired, ignoring confirmation"
                );
                Ok(false)
            }
            _ => Err(BillingError::PaymentNotFound(payment_id)),
        }
    }

    pub async fn cleanup_expired_payments(&self) -> Result<Vec<Uuid>, BillingError> {
        self.cleanup_expired_payments_at(Utc::now()).await
    }

    pub async fn cleanup_expired_payments_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, BillingError> {
        let expired = self.ledger.expire_crypto_payments(now).await?;
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired pending crypto payments");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::domain::{CryptoPaymentStatus, Organization, TransactionType};

    async fn setup() -> (Arc<MemoryStore>, CryptoPaymentMonitor, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let org = Organization::new("acme", BigDecimal::from(0));
        let org_id = org.id;
        store.upsert_organization(org).await;
        let monitor = CryptoPaymentMonitor::new(
            store.clone(),
            Duration::minutes(DEFAULT_PAYMENT_EXPIRY_MINUTES),
        );
        (store, monitor, org_id)
    }

    fn start(org_id: Uuid) -> StartCryptoPayment {
        StartCryptoPayment {
            organization_id: org_id,
            user_id: None,
            amount: BigDecimal::from(25),
            wallet_address: "0xwallet".to_string(),
            network: "base".to_string(),
            currency: "USDC".to_string(),
        }
    }

    fn verification(amount: i64) -> PaymentVerification {
        PaymentVerification {
            transaction_hash: "0xabc".to_string(),
            confirmations: 12,
            block_number: 1_000,
            amount: BigDecimal::from(amount),
        }
    }

    #[tokio::test]
    async fn test_start_creates_zero_amount_placeholder() {
        let (store, monitor, org_id) = setup().await;
        let now = Utc::now();
        let started = monitor.start_payment_monitoring_at(start(org_id), now).await.unwrap();

        assert_eq!(started.expires_at, now + Duration::minutes(30));
        let tx = store.get_transaction(started.payment_id).await.unwrap().unwrap();
        assert_eq!(tx.transaction_type, TransactionType::CryptoPending);
        assert_eq!(tx.amount, BigDecimal::from(0));

        let org = store.get_organization(org_id).await.unwrap().unwrap();
        assert_eq!(org.credit_balance, BigDecimal::from(0));
    }

    #[tokio::test]
    async fn test_start_for_unknown_org() {
        let (_, monitor, _) = setup().await;
        let err = monitor
            .start_payment_monitoring(start(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::OrganizationNotFound(_)));
    }

    #[tokio::test]
    async fn test_status_reflects_expiry_before_sweep() {
        let (_, monitor, org_id) = setup().await;
        let now = Utc::now();
        let started = monitor.start_payment_monitoring_at(start(org_id), now).await.unwrap();

        let status = monitor.payment_status_at(started.payment_id, now).await.unwrap();
        assert_eq!(status.status, CryptoPaymentStatus::Pending);

        let later = now + Duration::minutes(31);
        let status = monitor.payment_status_at(started.payment_id, later).await.unwrap();
        assert_eq!(status.status, CryptoPaymentStatus::Expired);
    }

    #[tokio::test]
    async fn test_confirm_after_deadline_is_noop() {
        let (store, monitor, org_id) = setup().await;
        let now = Utc::now();
        let started = monitor.start_payment_monitoring_at(start(org_id), now).await.unwrap();

        let applied = monitor
            .process_confirmed_payment_at(
                started.payment_id,
                verification(25),
                now + Duration::minutes(31),
            )
            .await
            .unwrap();
        assert!(!applied);
        let org = store.get_organization(org_id).await.unwrap().unwrap();
        assert_eq!(org.credit_balance, BigDecimal::from(0));
    }

    #[tokio::test]
    async fn test_confirm_unknown_payment() {
        let (_, monitor, _) = setup().await;
        let err = monitor
            .process_confirmed_payment(Uuid::new_v4(), verification(5))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::PaymentNotFound(_)));
    }

    #[tokio::test]
    async fn test_zero_verification_amount_rejected() {
        let (_, monitor, org_id) = setup().await;
        let started = monitor.start_payment_monitoring(start(org_id)).await.unwrap();
        let err = monitor
            .process_confirmed_payment(started.payment_id, verification(0))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn test_sweep_then_confirm_does_not_credit() {
        let (store, monitor, org_id) = setup().await;
        let now = Utc::now();
        let started = monitor.start_payment_monitoring_at(start(org_id), now).await.unwrap();

        let expired = monitor
            .cleanup_expired_payments_at(now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(expired, vec![started.payment_id]);

        let applied = monitor
            .process_confirmed_payment(started.payment_id, verification(25))
            .await
            .unwrap();
        assert!(!applied);

        let tx = store.get_transaction(started.payment_id).await.unwrap().unwrap();
        assert_eq!(tx.transaction_type, TransactionType::CryptoExpired);
        assert_eq!(tx.amount, BigDecimal::from(0));
    }
}
