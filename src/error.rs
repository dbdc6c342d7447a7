use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use uuid::Uuid;

use crate::ports::RepositoryError;
use crate::provider::ProviderError;

/// Errors raised by the billing services.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Webhook event {event_id} is too old: {age_secs}s exceeds the {window_secs}s replay window")]
    StaleEvent {
        event_id: String,
        age_secs: i64,
        window_secs: i64,
    },
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Organization not found: {0}")]
    OrganizationNotFound(Uuid),
    #[error("Organization {0} has no payment customer on file")]
    MissingPaymentCustomer(Uuid),
    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Payment provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Billing(err) => match err {
                BillingError::StaleEvent { .. }
                | BillingError::InvalidAmount(_)
                | BillingError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                BillingError::OrganizationNotFound(_) | BillingError::PaymentNotFound(_) => {
                    (StatusCode::NOT_FOUND, err.to_string())
                }
                BillingError::MissingPaymentCustomer(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
                }
                BillingError::Provider(_) => {
                    tracing::error!("Provider error: {}", err);
                    (StatusCode::BAD_GATEWAY, "Payment provider unavailable".to_string())
                }
                BillingError::Repository(_) => {
                    tracing::error!("Internal error: {}", err);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
                }
            },
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
