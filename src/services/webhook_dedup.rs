//! At-most-once gate for inbound payment provider webhooks.
//!
//! The claim is an atomic insert into the event store keyed by event id. Only
//! the caller whose insert lands runs the processing closure; everyone else
//! gets a soft success so the provider stops redelivering.

use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::{ProcessingOutcome, ProcessingStats, WebhookEvent, WebhookProcessingResult};
use crate::error::BillingError;
use crate::ports::WebhookEventStore;

pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct WebhookDeduplicator {
    store: Arc<dyn WebhookEventStore>,
    replay_window: Duration,
}

impl WebhookDeduplicator {
    pub fn new(store: Arc<dyn WebhookEventStore>, replay_window: Duration) -> Self {
        Self {
            store,
            replay_window,
        }
    }

    pub fn replay_window(&self) -> Duration {
        self.replay_window
    }

    pub async fn process_webhook_safely<F, Fut, E>(
        &self,
        event: &WebhookEvent,
        processing_fn: F,
    ) -> WebhookProcessingResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        self.process_webhook_safely_at(event, processing_fn, Utc::now())
            .await
    }

    pub async fn process_webhook_safely_at<F, Fut, E>(
        &self,
        event: &WebhookEvent,
        processing_fn: F,
        now: DateTime<Utc>,
    ) -> WebhookProcessingResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let window_secs = i64::try_from(self.replay_window.as_secs()).unwrap_or(i64::MAX);
        let age_secs = event.age_secs(now);
        if age_secs > window_secs {
            let err = BillingError::StaleEvent {
                event_id: event.id.clone(),
                age_secs,
                window_secs,
            };
            warn!(event_id = %event.id, age_secs, "Rejecting stale webhook event");
            return WebhookProcessingResult::stale(err.to_string());
        }

        match self.store.claim(event, now).await {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    event_id = %event.id,
                    organization_id = %event.organization_id,
                    "Duplicate webhook event, skipping"
                );
                return WebhookProcessingResult::ok();
            }
            Err(e) => {
                error!(event_id = %event.id, error = %e, "Failed to claim webhook event");
                return WebhookProcessingResult::failed(e.to_string());
            }
        }

        debug!(event_id = %event.id, event_type = %event.event_type, "Claimed webhook event");

        let outcome = match processing_fn().await {
            Ok(()) => ProcessingOutcome::Succeeded,
            Err(e) => ProcessingOutcome::Failed(e.to_string()),
        };

        self.record_outcome(&event.id, &outcome).await;

        match outcome {
            ProcessingOutcome::Succeeded => {
                info!(
                    event_id = %event.id,
                    organization_id = %event.organization_id,
                    "Webhook event processed"
                );
                WebhookProcessingResult::ok()
            }
            ProcessingOutcome::Failed(message) => {
                error!(
                    event_id = %event.id,
                    organization_id = %event.organization_id,
                    error = %message,
                    "Webhook event processing failed"
                );
                WebhookProcessingResult::failed(message)
            }
        }
    }

    // The side effect already happened, so a lost outcome write only costs
    // bookkeeping. One retry, then log.
    async fn record_outcome(&self, event_id: &str, outcome: &ProcessingOutcome) {
        if let Err(first) = self.store.record_outcome(event_id, outcome, Utc::now()).await {
            warn!(event_id, error = %first, "Retrying webhook outcome write");
            if let Err(e) = self.store.record_outcome(event_id, outcome, Utc::now()).await {
                error!(event_id, error = %e, "Could not record webhook outcome");
            }
        }
    }

    pub async fn processing_stats(&self) -> Result<ProcessingStats, BillingError> {
        Ok(self.store.processing_stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::domain::{PaymentEvent, WebhookEventStatus};
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn event(id: &str, created_at: i64) -> WebhookEvent {
        WebhookEvent {
            id: id.to_string(),
            event_type: "payment_intent.succeeded".to_string(),
            created_at,
            organization_id: Uuid::new_v4(),
            payload: PaymentEvent::Unhandled,
        }
    }

    fn dedup(store: Arc<MemoryStore>) -> WebhookDeduplicator {
        WebhookDeduplicator::new(store, DEFAULT_REPLAY_WINDOW)
    }

    #[tokio::test]
    async fn test_first_delivery_runs_and_records_success() {
        let store = Arc::new(MemoryStore::new());
        let dedup = dedup(store.clone());
        let calls = AtomicU32::new(0);
        let evt = event("evt_1", Utc::now().timestamp());

        let result = dedup
            .process_webhook_safely(&evt, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BillingError>(())
            })
            .await;

        assert!(result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let record = store.get_event("evt_1").await.unwrap().unwrap();
        assert_eq!(record.status, WebhookEventStatus::Succeeded);
        assert!(record.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_redelivery_is_soft_success_without_rerun() {
        let store = Arc::new(MemoryStore::new());
        let dedup = dedup(store);
        let calls = AtomicU32::new(0);
        let evt = event("evt_2", Utc::now().timestamp());

        for _ in 0..3 {
            let result = dedup
                .process_webhook_safely(&evt, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BillingError>(())
                })
                .await;
            assert!(result.success);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let dedup = dedup(store.clone());
        let evt = event("evt_3", Utc::now().timestamp());

        let result = dedup
            .process_webhook_safely(&evt, || async { Err::<(), _>("card declined") })
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("card declined"));

        let record = store.get_event("evt_3").await.unwrap().unwrap();
        assert_eq!(record.status, WebhookEventStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("card declined"));

        // The provider's redelivery hits the existing record.
        let again = dedup
            .process_webhook_safely(&evt, || async { Err::<(), _>("should not run") })
            .await;
        assert!(again.success);
    }

    #[tokio::test]
    async fn test_stale_event_rejected_before_claim() {
        let store = Arc::new(MemoryStore::new());
        let dedup = dedup(store.clone());
        let now = Utc::now();
        let evt = event("evt_old", now.timestamp() - 301);

        let result = dedup
            .process_webhook_safely_at(&evt, || async { Ok::<_, BillingError>(()) }, now)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("too old"));
        assert!(store.get_event("evt_old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_event_at_window_edge_is_accepted() {
        let store = Arc::new(MemoryStore::new());
        let dedup = dedup(store);
        let now = Utc::now();
        let evt = event("evt_edge", now.timestamp() - 300);

        let result = dedup
            .process_webhook_safely_at(&evt, || async { Ok::<_, BillingError>(()) }, now)
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_oversized_window_still_accepts_fresh_events() {
        let store = Arc::new(MemoryStore::new());
        let dedup = WebhookDeduplicator::new(store, Duration::from_secs(u64::MAX));
        let now = Utc::now();
        let evt = event("evt_fresh", now.timestamp());

        let result = dedup
            .process_webhook_safely_at(&evt, || async { Ok::<_, BillingError>(()) }, now)
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_processing_stats() {
        let store = Arc::new(MemoryStore::new());
        let dedup = dedup(store);
        let now = Utc::now().timestamp();

        dedup
            .process_webhook_safely(&event("a", now), || async { Ok::<_, BillingError>(()) })
            .await;
        dedup
            .process_webhook_safely(&event("b", now), || async { Err::<(), _>("boom") })
            .await;

        let stats = dedup.processing_stats().await.unwrap();
        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.failed_processed, 1);
        assert_eq!(stats.in_flight, 0);
    }
}
