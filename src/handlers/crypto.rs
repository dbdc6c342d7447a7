use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::domain::{PaymentVerification, StartCryptoPayment};
use crate::error::AppError;
use crate::AppState;

pub async fn start_payment(
    State(state): State<AppState>,
    Json(request): Json<StartCryptoPayment>,
) -> Result<impl IntoResponse, AppError> {
    let started = state
        .services
        .crypto_monitor
        .start_payment_monitoring(request)
        .await?;
    Ok((StatusCode::CREATED, Json(started)))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let report = state.services.crypto_monitor.payment_status(payment_id).await?;
    Ok(Json(report))
}

/// Called by the chain watcher once a transfer has enough confirmations.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(verification): Json<PaymentVerification>,
) -> Result<impl IntoResponse, AppError> {
    let applied = state
        .services
        .crypto_monitor
        .process_confirmed_payment(payment_id, verification)
        .await?;
    Ok(Json(json!({ "applied": applied })))
}
