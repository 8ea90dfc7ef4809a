//! External trigger for the scheduler sweep.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use super::{ApiError, AppState};

/// `Authorization: Bearer <secret>` must match. No configured secret rejects everything.
fn authorized(headers: &HeaderMap, secret: Option<&SecretString>) -> bool {
    let Some(secret) = secret else {
        return false;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| !token.is_empty() && token == secret.expose_secret())
}

/// GET|POST /api/cron/scheduled-messages
pub async fn run_sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if !authorized(&headers, state.cron_secret.as_ref()) {
        warn!("Rejected unauthorized scheduler trigger");
        return Err(ApiError::unauthorized());
    }

    let report = state
        .scheduler
        .sweep(Utc::now())
        .await
        .map_err(|e| ApiError::internal("Failed to process scheduled messages", e))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Processed scheduled messages",
        "report": report,
    })))
}
