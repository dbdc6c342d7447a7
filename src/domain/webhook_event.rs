//! Inbound payment-provider events and their processing records.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::credit_transaction::PaymentSource;

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";

/// Webhook body as delivered by the provider, after signature verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Provider-side unix timestamp, seconds.
    pub created_at: i64,
    pub organization_id: Uuid,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Metadata the platform attaches to payment intents it creates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentMetadata {
    #[serde(rename = "type", default)]
    pub source: PaymentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

impl IntentMetadata {
    pub fn auto_top_up(organization_id: Uuid) -> Self {
        Self {
            source: PaymentSource::AutoTopUp,
            organization_id: Some(organization_id),
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSucceeded {
    pub payment_intent_id: String,
    pub amount: BigDecimal,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: IntentMetadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    pub payment_intent_id: String,
    #[serde(default)]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub metadata: IntentMetadata,
}

/// Typed event payload, keyed by the envelope's `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    Succeeded(PaymentSucceeded),
    Failed(PaymentFailed),
    /// Event types this core acknowledges without acting on.
    Unhandled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    pub created_at: i64,
    pub organization_id: Uuid,
    pub payload: PaymentEvent,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid {event_type} payload: {source}")]
pub struct PayloadError {
    pub event_type: String,
    #[source]
    pub source: serde_json::Error,
}

impl TryFrom<WebhookEnvelope> for WebhookEvent {
    type Error = PayloadError;

    fn try_from(envelope: WebhookEnvelope) -> Result<Self, Self::Error> {
        let parse_err = |source| PayloadError {
            event_type: envelope.event_type.clone(),
            source,
        };
        let payload = match envelope.event_type.as_str() {
            PAYMENT_SUCCEEDED => PaymentEvent::Succeeded(
                serde_json::from_value(envelope.data.clone()).map_err(parse_err)?,
            ),
            PAYMENT_FAILED => PaymentEvent::Failed(
                serde_json::from_value(envelope.data.clone()).map_err(parse_err)?,
            ),
            _ => PaymentEvent::Unhandled,
        };

        Ok(Self {
            id: envelope.id,
            event_type: envelope.event_type,
            created_at: envelope.created_at,
            organization_id: envelope.organization_id,
            payload,
        })
    }
}

impl WebhookEvent {
    /// Seconds elapsed between provider creation and `now`.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp() - self.created_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventStatus {
    Processing,
    Succeeded,
    Failed,
}

impl WebhookEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Persisted trace of an event id having been claimed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookEventRecord {
    pub event_id: String,
    pub organization_id: Uuid,
    pub event_type: String,
    pub status: WebhookEventStatus,
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Succeeded,
    Failed(String),
}

impl ProcessingOutcome {
    pub fn status(&self) -> WebhookEventStatus {
        match self {
            Self::Succeeded => WebhookEventStatus::Succeeded,
            Self::Failed(_) => WebhookEventStatus::Failed,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::Failed(msg) => Some(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    pub total_processed: i64,
    pub failed_processed: i64,
    /// Claimed but never finished; usually a crashed worker.
    pub in_flight: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    StaleEvent,
    ProcessingFailed,
}

/// What the caller of the dedup gate gets back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookProcessingResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub failure: Option<FailureKind>,
}

impl WebhookProcessingResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            failure: None,
        }
    }

    pub fn stale(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            failure: Some(FailureKind::StaleEvent),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            failure: Some(FailureKind::ProcessingFailed),
        }
    }
}
