//! Contact endpoints: inbox list, detail, duplicate detection and merge.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::info;

use super::{ApiError, AppState};
use crate::channels::ChannelKind;
use crate::contacts::{DEFAULT_THRESHOLD, find_duplicates, merge_contacts};
use crate::error::ValidationError;
use crate::realtime::EventKind;
use crate::store::ContactFilter;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    q: Option<String>,
    channel: Option<String>,
    status: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> Result<ContactFilter, ValidationError> {
        let channel = match self.channel.as_deref().filter(|c| !c.is_empty()) {
            Some(raw) => Some(
                raw.parse::<ChannelKind>()
                    .map_err(|e| ValidationError::single("channel", e))?,
            ),
            None => None,
        };
        let unread = match self.status.as_deref() {
            Some("unread") => Some(true),
            Some("read") => Some(false),
            _ => None,
        };
        Ok(ContactFilter {
            search: self.q.filter(|q| !q.trim().is_empty()),
            channel,
            unread,
        })
    }
}

/// GET /api/contacts?q=&channel=&status=
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = query.into_filter()?;
    let contacts = state.db.list_contact_summaries(&filter).await?;
    Ok(Json(contacts))
}

/// GET /api/contacts/{id}
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let contact = state
        .db
        .get_contact(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Contact not found"))?;
    Ok(Json(contact))
}

#[derive(Debug, Deserialize)]
pub struct DuplicatesQuery {
    threshold: Option<f64>,
}

/// GET /api/contacts/duplicates?threshold=
pub async fn duplicates(
    State(state): State<AppState>,
    Query(query): Query<DuplicatesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let threshold = query.threshold.unwrap_or(DEFAULT_THRESHOLD);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ValidationError::single("threshold", "Must be between 0 and 1").into());
    }
    let contacts = state.db.list_contacts().await?;
    let duplicates = find_duplicates(&contacts, threshold);
    Ok(Json(serde_json::json!({ "duplicates": duplicates })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeBody {
    #[serde(default)]
    primary_id: String,
    #[serde(default)]
    duplicate_id: String,
}

/// POST /api/contacts/merge
pub async fn merge(
    State(state): State<AppState>,
    body: Result<Json<MergeBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    if body.primary_id.is_empty() || body.duplicate_id.is_empty() {
        return Err(ValidationError::single("primaryId", "primaryId and duplicateId are required").into());
    }

    let contact = merge_contacts(state.db.as_ref(), &body.primary_id, &body.duplicate_id).await?;
    info!(primary_id = %contact.id, duplicate_id = %body.duplicate_id, "Contacts merged");

    state
        .fanout
        .notify_contact(
            &contact.id,
            EventKind::ContactUpdated,
            serde_json::json!({ "contact": contact, "mergedFrom": body.duplicate_id }),
        )
        .await;

    Ok(Json(serde_json::json!({ "success": true, "contact": contact })))
}
