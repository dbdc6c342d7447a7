//! Credit ledger entities.
//! Framework-agnostic representation of an organization's credit history.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::crypto_payment::CryptoPaymentDetails;

/// Kind of ledger entry. Stored as snake_case text in the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Usage,
    Refund,
    Bonus,
    Transfer,
    CryptoPending,
    CryptoExpired,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Usage => "usage",
            Self::Refund => "refund",
            Self::Bonus => "bonus",
            Self::Transfer => "transfer",
            Self::CryptoPending => "crypto_pending",
            Self::CryptoExpired => "crypto_expired",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown transaction type: {0}")]
pub struct UnknownTransactionType(pub String);

impl FromStr for TransactionType {
    type Err = UnknownTransactionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "usage" => Ok(Self::Usage),
            "refund" => Ok(Self::Refund),
            "bonus" => Ok(Self::Bonus),
            "transfer" => Ok(Self::Transfer),
            "crypto_pending" => Ok(Self::CryptoPending),
            "crypto_expired" => Ok(Self::CryptoExpired),
            other => Err(UnknownTransactionType(other.to_string())),
        }
    }
}

/// Where the money behind a fiat purchase came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    #[default]
    Checkout,
    #[serde(rename = "auto_topup")]
    AutoTopUp,
}

/// Typed metadata blob stored alongside each ledger entry.
///
/// The variant follows the entry's [`TransactionType`]; crypto rows carry the
/// on-chain details needed to finalize or expire them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionMetadata {
    Plain,
    Purchase {
        source: PaymentSource,
    },
    CryptoPending(CryptoPaymentDetails),
    CryptoConfirmed {
        #[serde(flatten)]
        details: CryptoPaymentDetails,
        confirmations: i64,
        block_number: i64,
    },
    CryptoExpired {
        #[serde(flatten)]
        details: CryptoPaymentDetails,
        expired_at: DateTime<Utc>,
    },
}

impl TransactionMetadata {
    /// Crypto details, whatever stage the payment is in.
    pub fn crypto_details(&self) -> Option<&CryptoPaymentDetails> {
        match self {
            Self::CryptoPending(details)
            | Self::CryptoConfirmed { details, .. }
            | Self::CryptoExpired { details, .. } => Some(details),
            Self::Plain | Self::Purchase { .. } => None,
        }
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub transaction_type: TransactionType,
    pub description: String,
    /// Balance snapshot after this entry was applied. `None` for crypto
    /// placeholders that never touched the balance.
    pub balance_after: Option<BigDecimal>,
    pub payment_intent_id: Option<String>,
    pub transaction_hash: Option<String>,
    pub metadata: TransactionMetadata,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Placeholder row reserving a crypto payment. Carries no credit.
    pub fn crypto_pending(
        organization_id: Uuid,
        user_id: Option<Uuid>,
        details: CryptoPaymentDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            user_id,
            amount: BigDecimal::from(0),
            transaction_type: TransactionType::CryptoPending,
            description: format!(
                "Pending {} payment of ${} on {}",
                details.currency, details.expected_usd, details.network
            ),
            balance_after: None,
            payment_intent_id: None,
            transaction_hash: None,
            metadata: TransactionMetadata::CryptoPending(details),
            created_at: now,
        }
    }

    pub fn is_crypto(&self) -> bool {
        self.metadata.crypto_details().is_some()
    }
}

/// A positive balance change about to be written to the ledger.
///
/// The ledger fills in `balance_after` once it holds the organization lock.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerCredit {
    pub user_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub transaction_type: TransactionType,
    pub description: String,
    pub payment_intent_id: Option<String>,
    pub transaction_hash: Option<String>,
    pub metadata: TransactionMetadata,
}

impl LedgerCredit {
    pub fn purchase(
        user_id: Option<Uuid>,
        amount: BigDecimal,
        payment_intent_id: String,
        source: PaymentSource,
    ) -> Self {
        let description = match source {
            PaymentSource::Checkout => format!("Credit purchase of ${}", amount),
            PaymentSource::AutoTopUp => format!("Auto top-up of ${}", amount),
        };
        Self {
            user_id,
            amount,
            transaction_type: TransactionType::Purchase,
            description,
            payment_intent_id: Some(payment_intent_id),
            transaction_hash: None,
            metadata: TransactionMetadata::Purchase { source },
        }
    }

    pub fn into_transaction(
        self,
        organization_id: Uuid,
        balance_after: BigDecimal,
        now: DateTime<Utc>,
    ) -> CreditTransaction {
        CreditTransaction {
            id: Uuid::new_v4(),
            organization_id,
            user_id: self.user_id,
            amount: self.amount,
            transaction_type: self.transaction_type,
            description: self.description,
            balance_after: Some(balance_after),
            payment_intent_id: self.payment_intent_id,
            transaction_hash: self.transaction_hash,
            metadata: self.metadata,
            created_at: now,
        }
    }
}
