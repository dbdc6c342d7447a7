use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{
    PaymentEvent, PaymentSource, TopUpResolution, WebhookEvent, WebhookProcessingResult,
};
use crate::error::BillingError;
use crate::services::auto_top_up::AutoTopUpService;
use crate::services::settlement::{ConfirmPayment, SettlementService};
use crate::services::webhook_dedup::WebhookDeduplicator;

/// Routes a claimed webhook event to the engine that owns it.
#[derive(Clone)]
pub struct PaymentEventProcessor {
    deduplicator: WebhookDeduplicator,
    settlement: SettlementService,
    auto_top_up: Arc<AutoTopUpService>,
}

impl PaymentEventProcessor {
    pub fn new(
        deduplicator: WebhookDeduplicator,
        settlement: SettlementService,
        auto_top_up: Arc<AutoTopUpService>,
    ) -> Self {
        Self {
            deduplicator,
            settlement,
            auto_top_up,
        }
    }

    pub fn deduplicator(&self) -> &WebhookDeduplicator {
        &self.deduplicator
    }

    /// Runs `event` through the dedup gate and, for the winning delivery only,
    /// applies its side effects.
    pub async fn process(&self, event: &WebhookEvent) -> WebhookProcessingResult {
        self.deduplicator
            .process_webhook_safely(event, || self.apply(event))
            .await
    }

    async fn apply(&self, event: &WebhookEvent) -> Result<(), BillingError> {
        match &event.payload {
            PaymentEvent::Succeeded(payment) => {
                let organization_id = payment
                    .metadata
                    .organization_id
                    .unwrap_or(event.organization_id);

                self.settlement
                    .confirm_payment_and_add_credits(ConfirmPayment {
                        organization_id,
                        user_id: payment.user_id.or(payment.metadata.user_id),
                        amount: payment.amount.clone(),
                        payment_intent_id: payment.payment_intent_id.clone(),
                        source: payment.metadata.source,
                    })
                    .await?;

                // Credits are already committed; an unreleased claim lapses with the cooldown.
                if payment.metadata.source == PaymentSource::AutoTopUp {
                    if let Err(e) = self
                        .auto_top_up
                        .resolve_auto_top_up(
                            organization_id,
                            Some(&payment.payment_intent_id),
                            TopUpResolution::Succeeded,
                        )
                        .await
                    {
                        warn!(
                            event_id = %event.id,
                            organization_id = %organization_id,
                            payment_intent_id = %payment.payment_intent_id,
                            error = %e,
                            "Credits applied but auto top-up claim was not released"
                        );
                    }
                }
                Ok(())
            }
            PaymentEvent::Failed(failure) => {
                let organization_id = failure
                    .metadata
                    .organization_id
                    .unwrap_or(event.organization_id);
                warn!(
                    event_id = %event.id,
                    organization_id = %organization_id,
                    payment_intent_id = %failure.payment_intent_id,
                    reason = ?failure.failure_message,
                    "Payment failed at provider, no credits applied"
                );

                if failure.metadata.source == PaymentSource::AutoTopUp {
                    self.auto_top_up
                        .resolve_auto_top_up(
                            organization_id,
                            Some(&failure.payment_intent_id),
                            TopUpResolution::Failed,
                        )
                        .await?;
                }
                Ok(())
            }
            PaymentEvent::Unhandled => {
                debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event type");
                Ok(())
            }
        }
    }
}
