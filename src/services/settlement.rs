use bigdecimal::BigDecimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{CreditTransaction, LedgerCredit, PaymentSource};
use crate::error::BillingError;
use crate::ports::{CreditLedger, RepositoryError};

/// A provider-confirmed payment ready to become credits.
#[derive(Debug, Clone)]
pub struct ConfirmPayment {
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub payment_intent_id: String,
    pub source: PaymentSource,
}

/// Applies confirmed payments to the ledger.
///
/// Callers must already hold the webhook claim for the payment; this service
/// does not look for an earlier settlement of the same intent.
#[derive(Clone)]
pub struct SettlementService {
    ledger: Arc<dyn CreditLedger>,
}

impl SettlementService {
    pub fn new(ledger: Arc<dyn CreditLedger>) -> Self {
        Self { ledger }
    }

    pub async fn confirm_payment_and_add_credits(
        &self,
        payment: ConfirmPayment,
    ) -> Result<CreditTransaction, BillingError> {
        if payment.amount <= BigDecimal::from(0) {
            return Err(BillingError::InvalidAmount(format!(
                "settlement amount must be positive, got {}",
                payment.amount
            )));
        }

        let organization_id = payment.organization_id;
        let credit = LedgerCredit::purchase(
            payment.user_id,
            payment.amount,
            payment.payment_intent_id,
            payment.source,
        );

        let entry = self
            .ledger
            .apply_credit(organization_id, credit)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => BillingError::OrganizationNotFound(organization_id),
                other => BillingError::Repository(other),
            })?;

        info!(
            organization_id = %organization_id,
            amount = %entry.amount,
            balance_after = ?entry.balance_after,
            payment_intent_id = ?entry.payment_intent_id,
            "Credits added"
        );

        Ok(entry)
    }
}
