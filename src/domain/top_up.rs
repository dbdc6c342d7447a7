use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// State of an organization's most recent automatic purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopUpClaimStatus {
    InFlight,
    Succeeded,
    Failed,
}

impl TopUpClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_flight" => Some(Self::InFlight),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// How an in-flight top-up ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopUpResolution {
    Succeeded,
    Failed,
}

impl From<TopUpResolution> for TopUpClaimStatus {
    fn from(resolution: TopUpResolution) -> Self {
        match resolution {
            TopUpResolution::Succeeded => Self::Succeeded,
            TopUpResolution::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopUpClaim {
    pub organization_id: Uuid,
    pub status: TopUpClaimStatus,
    pub payment_intent_id: Option<String>,
    pub claimed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TopUpClaim {
    /// Whether this claim still blocks a new trigger at `now`.
    pub fn blocks(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.status == TopUpClaimStatus::InFlight && self.claimed_at + cooldown > now
    }
}

/// Outcome of a sweep over every auto-top-up organization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkTopUpReport {
    pub checked: usize,
    pub triggered: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Request sent to the payment provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatePaymentIntent {
    pub amount: BigDecimal,
    pub currency: String,
    pub customer_id: String,
    pub metadata: super::IntentMetadata,
}

/// Provider's view of a payment intent.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, Serialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: BigDecimal,
    pub status: String,
}
