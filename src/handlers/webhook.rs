use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::domain::{FailureKind, WebhookEnvelope, WebhookEvent};
use crate::error::{AppError, BillingError};
use crate::AppState;

/// Receives payment provider webhooks. Signature verification happens in
/// front of this handler.
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(envelope): Json<WebhookEnvelope>,
) -> Result<impl IntoResponse, AppError> {
    tracing::debug!(event_id = %envelope.id, event_type = %envelope.event_type, "Webhook received");

    let event = WebhookEvent::try_from(envelope)
        .map_err(|e| BillingError::InvalidPayload(e.to_string()))?;

    let result = state.services.events.process(&event).await;

    let status = match result.failure {
        None => StatusCode::OK,
        Some(FailureKind::StaleEvent) => StatusCode::BAD_REQUEST,
        Some(FailureKind::ProcessingFailed) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    Ok((status, Json(result)))
}

pub async fn webhook_stats(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let stats = state
        .services
        .events
        .deduplicator()
        .processing_stats()
        .await?;
    Ok(Json(stats))
}
