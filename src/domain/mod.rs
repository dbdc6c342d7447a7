//! Domain entities for credit settlement.

pub mod credit_transaction;
pub mod crypto_payment;
pub mod organization;
pub mod top_up;
pub mod webhook_event;

pub use credit_transaction::{
    CreditTransaction, LedgerCredit, PaymentSource, TransactionMetadata, TransactionType,
};
pub use crypto_payment::{
    CryptoPaymentDetails, CryptoPaymentStatus, PaymentStatusReport, PaymentVerification,
    StartCryptoPayment, StartedCryptoPayment,
};
pub use organization::Organization;
pub use top_up::{
    BulkTopUpReport, CreatePaymentIntent, PaymentIntent, TopUpClaim, TopUpClaimStatus,
    TopUpResolution,
};
pub use webhook_event::{
    FailureKind, IntentMetadata, PaymentEvent, PaymentFailed, PaymentSucceeded, ProcessingOutcome,
    ProcessingStats, WebhookEnvelope, WebhookEvent, WebhookEventRecord, WebhookEventStatus,
    WebhookProcessingResult,
};
