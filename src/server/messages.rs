//! Operator message endpoints: send, timeline, read state, scheduled queue.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use super::{ApiError, AppState};
use crate::channels::ChannelKind;
use crate::dispatch::{DispatchOutcome, SendRequest};
use crate::error::{FieldError, ValidationError};
use crate::realtime::EventKind;

/// Header set by the external auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBody {
    #[serde(default)]
    contact_id: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    media_urls: Vec<String>,
    scheduled_for: Option<String>,
}

impl SendBody {
    fn into_request(self, user_id: Option<String>) -> Result<SendRequest, ValidationError> {
        let mut errors = Vec::new();
        if self.contact_id.trim().is_empty() {
            errors.push(FieldError::new("contactId", "Required"));
        }
        let channel = match self.channel.parse::<ChannelKind>() {
            Ok(c) => Some(c),
            Err(e) => {
                errors.push(FieldError::new("channel", e));
                None
            }
        };
        if self.body.trim().is_empty() {
            errors.push(FieldError::new("body", "Must not be empty"));
        }
        let scheduled_for = match self.scheduled_for.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(t) => Some(t.with_timezone(&Utc)),
                Err(_) => {
                    errors.push(FieldError::new("scheduledFor", "Expected an RFC 3339 timestamp"));
                    None
                }
            },
        };

        match channel {
            Some(channel) if errors.is_empty() => Ok(SendRequest {
                contact_id: self.contact_id,
                channel,
                body: self.body,
                media_urls: self.media_urls,
                scheduled_for,
                user_id,
            }),
            _ => Err(ValidationError(errors)),
        }
    }
}

/// Acting user from the auth layer header, if any.
pub(crate) fn user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// POST /api/messages/send
pub async fn send(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SendBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let request = body.into_request(user_id(&headers))?;

    let response = match state.dispatcher.dispatch(request).await? {
        DispatchOutcome::Sent {
            message,
            external_id,
        } => serde_json::json!({
            "success": true,
            "messageId": message.id,
            "externalId": external_id,
        }),
        DispatchOutcome::Scheduled { scheduled } => serde_json::json!({
            "success": true,
            "messageId": scheduled.id,
            "scheduled": true,
        }),
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineQuery {
    contact_id: Option<String>,
}

/// GET /api/messages?contactId=
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<TimelineQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let contact_id = query
        .contact_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ValidationError::single("contactId", "Required"))?;
    let messages = state.db.list_messages_for_contact(&contact_id).await?;
    Ok(Json(messages))
}

/// POST /api/messages/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .db
        .mark_message_read(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;

    let payload = serde_json::json!({
        "messageId": message.id,
        "contactId": message.contact_id,
        "readAt": message.read_at,
    });
    state
        .fanout
        .notify_contact(&message.contact_id, EventKind::MessageRead, payload.clone())
        .await;
    state
        .fanout
        .notify_viewers(&message.contact_id, EventKind::MessageRead, payload)
        .await;

    info!(message_id = %message.id, "Message marked read");
    Ok(Json(message))
}

/// GET /api/messages/unread-count
pub async fn unread_count(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let count = state.db.unread_count().await?;
    Ok(Json(serde_json::json!({ "count": count })))
}

/// GET /api/scheduled-messages
pub async fn list_due_scheduled(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let due = state.scheduler.due(Utc::now()).await?;
    Ok((StatusCode::OK, Json(due)))
}
