//! On-chain payment tracking types.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::credit_transaction::{CreditTransaction, TransactionMetadata, TransactionType};

/// What the payer was asked to send, and until when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoPaymentDetails {
    pub expected_usd: BigDecimal,
    pub wallet_address: String,
    pub network: String,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
}

/// Request to start watching for an on-chain payment.
#[derive(Debug, Clone, Deserialize)]
pub struct StartCryptoPayment {
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub wallet_address: String,
    pub network: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartedCryptoPayment {
    pub payment_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Chain data proving a payment landed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentVerification {
    pub transaction_hash: String,
    pub confirmations: i64,
    pub block_number: i64,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CryptoPaymentStatus {
    Pending,
    Confirmed,
    Expired,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusReport {
    pub payment_id: Uuid,
    pub status: CryptoPaymentStatus,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<PaymentVerification>,
}

impl PaymentStatusReport {
    /// Derives the status of a crypto ledger row as seen at `now`.
    ///
    /// A pending row past its expiry reads as expired even if the sweep has
    /// not flipped it yet. Returns `None` for rows that are not crypto payments.
    pub fn derive(tx: &CreditTransaction, now: DateTime<Utc>) -> Option<Self> {
        let (status, verification) = match (&tx.transaction_type, &tx.metadata) {
            (TransactionType::CryptoPending, TransactionMetadata::CryptoPending(details)) => {
                if now > details.expires_at {
                    (CryptoPaymentStatus::Expired, None)
                } else {
                    (CryptoPaymentStatus::Pending, None)
                }
            }
            (
                TransactionType::Purchase,
                TransactionMetadata::CryptoConfirmed {
                    confirmations,
                    block_number,
                    ..
                },
            ) => (
                CryptoPaymentStatus::Confirmed,
                Some(PaymentVerification {
                    transaction_hash: tx.transaction_hash.clone().unwrap_or_default(),
                    confirmations: *confirmations,
                    block_number: *block_number,
                    amount: tx.amount.clone(),
                }),
            ),
            (TransactionType::CryptoExpired, TransactionMetadata::CryptoExpired { .. }) => {
                (CryptoPaymentStatus::Expired, None)
            }
            _ => return None,
        };

        let expires_at = tx.metadata.crypto_details()?.expires_at;

        Some(Self {
            payment_id: tx.id,
            status,
            expires_at,
            verification,
        })
    }
}
