use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::services::auto_top_up::AutoTopUpService;
use crate::services::crypto_monitor::CryptoPaymentMonitor;
use crate::services::scheduler::Job;

/// Flips overdue `crypto_pending` rows to `crypto_expired`.
pub struct CryptoExpiryJob {
    monitor: Arc<CryptoPaymentMonitor>,
    schedule: String,
}

impl CryptoExpiryJob {
    pub fn new(monitor: Arc<CryptoPaymentMonitor>, schedule: impl Into<String>) -> Self {
        Self {
            monitor,
            schedule: schedule.into(),
        }
    }
}

#[async_trait]
impl Job for CryptoExpiryJob {
    fn name(&self) -> &str {
        "crypto_payment_expiry"
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    async fn execute(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.monitor.cleanup_expired_payments().await?;
        Ok(())
    }
}

/// Periodic pass over every organization with auto top-up enabled.
pub struct AutoTopUpSweepJob {
    auto_top_up: Arc<AutoTopUpService>,
    schedule: String,
}

impl AutoTopUpSweepJob {
    pub fn new(auto_top_up: Arc<AutoTopUpService>, schedule: impl Into<String>) -> Self {
        Self {
            auto_top_up,
            schedule: schedule.into(),
        }
    }
}

#[async_trait]
impl Job for AutoTopUpSweepJob {
    fn name(&self) -> &str {
        "auto_top_up_sweep"
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    async fn execute(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let report = self.auto_top_up.bulk_check_auto_top_up().await?;
        for err in &report.errors {
            warn!(error = %err, "Auto top-up check failed");
        }
        Ok(())
    }
}
