pub mod auto_top_up;
pub mod crypto_monitor;
pub mod jobs;
pub mod payment_events;
pub mod scheduler;
pub mod settlement;
pub mod webhook_dedup;

pub use auto_top_up::AutoTopUpService;
pub use crypto_monitor::CryptoPaymentMonitor;
pub use jobs::{AutoTopUpSweepJob, CryptoExpiryJob};
pub use payment_events::PaymentEventProcessor;
pub use scheduler::{Job, JobScheduler, JobStatus, SchedulerError};
pub use settlement::{ConfirmPayment, SettlementService};
pub use webhook_dedup::WebhookDeduplicator;
