//! Analytics dashboard endpoint.

use axum::Json;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::analytics::{AnalyticsReport, window_start};
use crate::error::ValidationError;

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    days: Option<String>,
}

impl AnalyticsQuery {
    fn days(&self) -> Result<Option<i64>, ValidationError> {
        match self.days.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ValidationError::single("days", "Expected a whole number of days")),
            None => Ok(None),
        }
    }
}

/// GET /api/analytics?days=
pub async fn report(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let since = window_start(Utc::now(), query.days()?)?;
    let stats = state.db.message_stats(since).await?;
    Ok(Json(AnalyticsReport::from_stats(since, stats)))
}
