//! Balance-threshold driven purchases.
//!
//! A trigger is guarded by a per-organization claim row rather than by the
//! webhook event table: the claim stays in flight from the moment we ask the
//! provider for an intent until that intent's webhook resolves it or the
//! cooldown runs out.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{BulkTopUpReport, CreatePaymentIntent, IntentMetadata, TopUpResolution};
use crate::error::BillingError;
use crate::ports::{CreditLedger, TopUpClaimStore};
use crate::provider::PaymentProvider;

pub const DEFAULT_CURRENCY: &str = "usd";

#[derive(Clone)]
pub struct AutoTopUpService {
    ledger: Arc<dyn CreditLedger>,
    claims: Arc<dyn TopUpClaimStore>,
    provider: Arc<dyn PaymentProvider>,
    cooldown: Duration,
    currency: String,
}

impl AutoTopUpService {
    pub fn new(
        ledger: Arc<dyn CreditLedger>,
        claims: Arc<dyn TopUpClaimStore>,
        provider: Arc<dyn PaymentProvider>,
        cooldown: Duration,
    ) -> Self {
        Self {
            ledger,
            claims,
            provider,
            cooldown,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Returns true when this call created a payment intent.
    pub async fn check_and_trigger_auto_top_up(
        &self,
        organization_id: Uuid,
    ) -> Result<bool, BillingError> {
        self.check_and_trigger_auto_top_up_at(organization_id, Utc::now())
            .await
    }

    pub async fn check_and_trigger_auto_top_up_at(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, BillingError> {
        let org = self
            .ledger
            .get_organization(organization_id)
            .await?
            .ok_or(BillingError::OrganizationNotFound(organization_id))?;

        if !org.needs_auto_top_up() {
            debug!(organization_id = %organization_id, "Auto top-up not needed");
            return Ok(false);
        }

        let customer_id = org
            .payment_customer_id
            .clone()
            .ok_or(BillingError::MissingPaymentCustomer(organization_id))?;

        if !self.claims.try_claim(organization_id, now, self.cooldown).await? {
            debug!(organization_id = %organization_id, "Auto top-up already in flight");
            return Ok(false);
        }

        let request = CreatePaymentIntent {
            amount: org.auto_top_up_amount.clone(),
            currency: self.currency.clone(),
            customer_id,
            metadata: IntentMetadata::auto_top_up(organization_id),
        };

        let intent = match self.provider.create_payment_intent(&request).await {
            Ok(intent) => intent,
            Err(e) => {
                error!(organization_id = %organization_id, error = %e, "Auto top-up intent failed");
                if let Err(release_err) = self
                    .claims
                    .release(organization_id, None, TopUpResolution::Failed, now)
                    .await
                {
                    warn!(
                        organization_id = %organization_id,
                        error = %release_err,
                        "Could not release auto top-up claim; it will lapse after the cooldown"
                    );
                }
                return Err(e.into());
            }
        };

        if let Err(e) = self.claims.attach_intent(organization_id, &intent.id).await {
            warn!(
                organization_id = %organization_id,
                payment_intent_id = %intent.id,
                error = %e,
                "Could not bind payment intent to auto top-up claim"
            );
        }

        info!(
            organization_id = %organization_id,
            payment_intent_id = %intent.id,
            amount = %org.auto_top_up_amount,
            balance = %org.credit_balance,
            threshold = %org.credit_threshold,
            "Auto top-up triggered"
        );

        Ok(true)
    }

    /// Closes the in-flight claim once the provider reports back.
    pub async fn resolve_auto_top_up(
        &self,
        organization_id: Uuid,
        payment_intent_id: Option<&str>,
        resolution: TopUpResolution,
    ) -> Result<(), BillingError> {
        self.claims
            .release(organization_id, payment_intent_id, resolution, Utc::now())
            .await?;
        info!(
            organization_id = %organization_id,
            payment_intent_id = ?payment_intent_id,
            resolution = ?resolution,
            "Auto top-up resolved"
        );
        Ok(())
    }

    pub async fn bulk_check_auto_top_up(&self) -> Result<BulkTopUpReport, BillingError> {
        self.bulk_check_auto_top_up_at(Utc::now()).await
    }

    pub async fn bulk_check_auto_top_up_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<BulkTopUpReport, BillingError> {
        let organizations = self.ledger.list_auto_top_up_organizations().await?;
        let mut report = BulkTopUpReport::default();

        for org in organizations {
            report.checked += 1;
            match self.check_and_trigger_auto_top_up_at(org.id, now).await {
                Ok(true) => report.triggered += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", org.id, e));
                }
            }
        }

        info!(
            checked = report.checked,
            triggered = report.triggered,
            failed = report.failed,
            "Auto top-up sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::domain::{Organization, PaymentIntent, PaymentSource, TopUpClaimStatus};
    use crate::provider::ProviderError;
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubProvider {
        requests: Mutex<Vec<CreatePaymentIntent>>,
        fail: bool,
    }

    #[async_trait]
    impl PaymentProvider for StubProvider {
        async fn create_payment_intent(
            &self,
            request: &CreatePaymentIntent,
        ) -> Result<PaymentIntent, ProviderError> {
            if self.fail {
                return Err(ProviderError::CircuitBreakerOpen);
            }
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            Ok(PaymentIntent {
                id: format!("pi_{}", requests.len()),
                amount: request.amount.clone(),
                status: "processing".to_string(),
            })
        }
    }

    async fn setup(
        balance: i64,
        provider: Arc<StubProvider>,
    ) -> (Arc<MemoryStore>, AutoTopUpService, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let org = Organization::new("acme", BigDecimal::from(balance)).with_auto_top_up(
            BigDecimal::from(50),
            BigDecimal::from(75),
            "cus_1",
        );
        let org_id = org.id;
        store.upsert_organization(org).await;
        let service = AutoTopUpService::new(
            store.clone(),
            store.clone(),
            provider,
            Duration::minutes(15),
        );
        (store, service, org_id)
    }

    #[tokio::test]
    async fn test_trigger_then_suppress() {
        let provider = Arc::new(StubProvider::default());
        let (store, service, org_id) = setup(45, provider.clone()).await;

        assert!(service.check_and_trigger_auto_top_up(org_id).await.unwrap());
        assert!(!service.check_and_trigger_auto_top_up(org_id).await.unwrap());

        let requests = provider.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].amount, BigDecimal::from(75));
        assert_eq!(requests[0].metadata.source, PaymentSource::AutoTopUp);
        assert_eq!(requests[0].metadata.organization_id, Some(org_id));

        let claim = store.get_claim(org_id).await.unwrap().unwrap();
        assert_eq!(claim.payment_intent_id.as_deref(), Some("pi_1"));
    }

    #[tokio::test]
    async fn test_above_threshold_does_nothing() {
        let provider = Arc::new(StubProvider::default());
        let (_, service, org_id) = setup(50, provider.clone()).await;

        assert!(!service.check_and_trigger_auto_top_up(org_id).await.unwrap());
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolved_claim_allows_next_trigger() {
        let provider = Arc::new(StubProvider::default());
        let (_, service, org_id) = setup(10, provider.clone()).await;

        assert!(service.check_and_trigger_auto_top_up(org_id).await.unwrap());
        service
            .resolve_auto_top_up(org_id, Some("pi_1"), TopUpResolution::Failed)
            .await
            .unwrap();
        assert!(service.check_and_trigger_auto_top_up(org_id).await.unwrap());
        assert_eq!(provider.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_claim_lapses_after_cooldown() {
        let provider = Arc::new(StubProvider::default());
        let (_, service, org_id) = setup(10, provider.clone()).await;
        let now = Utc::now();

        assert!(service.check_and_trigger_auto_top_up_at(org_id, now).await.unwrap());
        assert!(!service
            .check_and_trigger_auto_top_up_at(org_id, now + Duration::minutes(14))
            .await
            .unwrap());
        assert!(service
            .check_and_trigger_auto_top_up_at(org_id, now + Duration::minutes(15))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_provider_failure_releases_claim() {
        let provider = Arc::new(StubProvider {
            fail: true,
            ..Default::default()
        });
        let (store, service, org_id) = setup(10, provider).await;

        let err = service.check_and_trigger_auto_top_up(org_id).await.unwrap_err();
        assert!(matches!(err, BillingError::Provider(_)));

        let claim = store.get_claim(org_id).await.unwrap().unwrap();
        assert_eq!(claim.status, TopUpClaimStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_customer_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let mut org = Organization::new("acme", BigDecimal::from(1)).with_auto_top_up(
            BigDecimal::from(50),
            BigDecimal::from(75),
            "cus_1",
        );
        org.payment_customer_id = None;
        let org_id = org.id;
        store.upsert_organization(org).await;
        let service = AutoTopUpService::new(
            store.clone(),
            store.clone(),
            Arc::new(StubProvider::default()),
            Duration::minutes(15),
        );

        let err = service.check_and_trigger_auto_top_up(org_id).await.unwrap_err();
        assert!(matches!(err, BillingError::MissingPaymentCustomer(_)));
        assert!(store.get_claim(org_id).await.unwrap().is_none());
    }
}
