use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

pub async fn check_auto_top_up(
    State(state): State<AppState>,
    Path(organization_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let triggered = state
        .services
        .auto_top_up
        .check_and_trigger_auto_top_up(organization_id)
        .await?;
    Ok(Json(json!({ "triggered": triggered })))
}
