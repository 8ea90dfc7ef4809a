//! Provider webhook endpoint.

use std::collections::HashMap;

use axum::Json;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use super::{ApiError, AppState};
use crate::ingest::IngestOutcome;

/// Empty TwiML acknowledgement.
pub const EMPTY_TWIML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#;

/// POST /api/webhooks/twilio
///
/// Status callbacks get an empty 200; new messages (including replays)
/// get an empty TwiML document. Storage failures return 500 so the
/// provider retries.
pub async fn receive(
    State(state): State<AppState>,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Result<Response, ApiError> {
    let Form(form) = form?;
    let outcome = match state.pipeline.ingest_form(&form).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "Webhook rejected");
            return Err(e.into());
        }
    };

    if let IngestOutcome::Duplicate { message_id } = &outcome {
        debug!(message_id = %message_id, "Replayed webhook acknowledged");
    }

    if outcome.is_status_callback() {
        return Ok(StatusCode::OK.into_response());
    }
    Ok(([(header::CONTENT_TYPE, "application/xml")], EMPTY_TWIML).into_response())
}

/// GET /api/webhooks/twilio
pub async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "message": "Twilio webhook endpoint is active"
    }))
}
