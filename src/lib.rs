pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod ports;
pub mod provider;
pub mod services;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::db::{MemoryStore, PgCreditLedger, PgTopUpClaimStore, PgWebhookEventStore};
use crate::health::HealthChecker;
use crate::ports::{CreditLedger, TopUpClaimStore, WebhookEventStore};
use crate::provider::PaymentProvider;
use crate::services::{
    AutoTopUpService, CryptoPaymentMonitor, PaymentEventProcessor, SettlementService,
    WebhookDeduplicator,
};

/// Tunables shared by the billing engines.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub replay_window: Duration,
    pub crypto_payment_expiry: chrono::Duration,
    pub auto_top_up_cooldown: chrono::Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            replay_window: services::webhook_dedup::DEFAULT_REPLAY_WINDOW,
            crypto_payment_expiry: chrono::Duration::minutes(
                services::crypto_monitor::DEFAULT_PAYMENT_EXPIRY_MINUTES,
            ),
            auto_top_up_cooldown: chrono::Duration::minutes(15),
        }
    }
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            replay_window: config.replay_window(),
            crypto_payment_expiry: config.crypto_payment_expiry(),
            auto_top_up_cooldown: config.auto_top_up_cooldown(),
        }
    }
}

#[derive(Clone)]
pub struct BillingServices {
    pub events: PaymentEventProcessor,
    pub settlement: SettlementService,
    pub auto_top_up: Arc<AutoTopUpService>,
    pub crypto_monitor: Arc<CryptoPaymentMonitor>,
}

impl BillingServices {
    pub fn new(
        webhook_events: Arc<dyn WebhookEventStore>,
        ledger: Arc<dyn CreditLedger>,
        top_up_claims: Arc<dyn TopUpClaimStore>,
        provider: Arc<dyn PaymentProvider>,
        settings: ServiceSettings,
    ) -> Self {
        let settlement = SettlementService::new(ledger.clone());
        let auto_top_up = Arc::new(AutoTopUpService::new(
            ledger.clone(),
            top_up_claims,
            provider,
            settings.auto_top_up_cooldown,
        ));
        let crypto_monitor = Arc::new(CryptoPaymentMonitor::new(
            ledger,
            settings.crypto_payment_expiry,
        ));
        let events = PaymentEventProcessor::new(
            WebhookDeduplicator::new(webhook_events, settings.replay_window),
            settlement.clone(),
            auto_top_up.clone(),
        );

        Self {
            events,
            settlement,
            auto_top_up,
            crypto_monitor,
        }
    }

    pub fn postgres(
        pool: PgPool,
        provider: Arc<dyn PaymentProvider>,
        settings: ServiceSettings,
    ) -> Self {
        Self::new(
            Arc::new(PgWebhookEventStore::new(pool.clone())),
            Arc::new(PgCreditLedger::new(pool.clone())),
            Arc::new(PgTopUpClaimStore::new(pool)),
            provider,
            settings,
        )
    }

    /// Single-process wiring; every port is served by the same store.
    pub fn in_memory(
        store: Arc<MemoryStore>,
        provider: Arc<dyn PaymentProvider>,
        settings: ServiceSettings,
    ) -> Self {
        Self::new(store.clone(), store.clone(), store, provider, settings)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub services: BillingServices,
    pub health_checker: Arc<HealthChecker>,
}

pub fn create_app(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks/payments", post(handlers::webhook::payment_webhook))
        .route("/webhooks/stats", get(handlers::webhook::webhook_stats))
        .route("/crypto-payments", post(handlers::crypto::start_payment))
        .route("/crypto-payments/:id", get(handlers::crypto::payment_status))
        .route(
            "/crypto-payments/:id/confirm",
            post(handlers::crypto::confirm_payment),
        )
        .route(
            "/organizations/:id/auto-top-up",
            post(handlers::top_up::check_auto_top_up),
        )
        .with_state(app_state)
}
