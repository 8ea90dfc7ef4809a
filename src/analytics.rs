//! Inbox analytics: message volume and reply metrics over a trailing window.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::channels::ChannelKind;
use crate::error::ValidationError;
use crate::model::Direction;

/// Window used when the caller gives none.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Longest accepted window.
pub const MAX_WINDOW_DAYS: i64 = 3650;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelCount {
    pub channel: ChannelKind,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionCount {
    pub direction: Direction,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: u64,
}

/// Messages created on one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCount {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub count: u64,
}

/// Raw aggregates for messages created at or after a cutoff.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageStats {
    pub by_channel: Vec<ChannelCount>,
    pub by_direction: Vec<DirectionCount>,
    /// Outbound messages only.
    pub outbound_by_status: Vec<StatusCount>,
    /// Mean seconds from an inbound message to the outbound message that
    /// directly follows it on the same contact. `None` when nothing was answered.
    pub avg_response_secs: Option<f64>,
    /// Outbound messages on contacts that also wrote in during the window.
    pub replied_outbound: u64,
    /// Oldest day first.
    pub daily: Vec<DailyCount>,
}

impl MessageStats {
    pub fn total(&self, direction: Direction) -> u64 {
        self.by_direction
            .iter()
            .filter(|c| c.direction == direction)
            .map(|c| c.count)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementMetrics {
    pub total_inbound: u64,
    pub total_outbound: u64,
    pub avg_response_time_minutes: i64,
    /// Percentage, two decimals.
    pub response_rate: f64,
    pub replied_messages: u64,
}

/// Dashboard payload for `GET /api/analytics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub since: DateTime<Utc>,
    pub messages_by_channel: Vec<ChannelCount>,
    pub messages_by_direction: Vec<DirectionCount>,
    pub messages_by_status: Vec<StatusCount>,
    pub metrics: EngagementMetrics,
    pub daily_volume: Vec<DailyCount>,
}

impl AnalyticsReport {
    pub fn from_stats(since: DateTime<Utc>, stats: MessageStats) -> Self {
        let total_inbound = stats.total(Direction::Inbound);
        let total_outbound = stats.total(Direction::Outbound);
        let response_rate = if total_outbound > 0 {
            round2(stats.replied_outbound as f64 / total_outbound as f64 * 100.0)
        } else {
            0.0
        };
        let avg_response_time_minutes = stats
            .avg_response_secs
            .map(|secs| (secs / 60.0).round() as i64)
            .unwrap_or(0);

        let messages_by_status = stats
            .outbound_by_status
            .into_iter()
            .map(|c| StatusCount {
                status: if c.status.trim().is_empty() {
                    "unknown".to_string()
                } else {
                    c.status
                },
                count: c.count,
            })
            .collect();

        Self {
            since,
            messages_by_channel: stats.by_channel,
            messages_by_direction: stats.by_direction,
            messages_by_status,
            metrics: EngagementMetrics {
                total_inbound,
                total_outbound,
                avg_response_time_minutes,
                response_rate,
                replied_messages: stats.replied_outbound,
            },
            daily_volume: stats.daily,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Start of a trailing window of `days` ending at `now`.
pub fn window_start(now: DateTime<Utc>, days: Option<i64>) -> Result<DateTime<Utc>, ValidationError> {
    let days = days.unwrap_or(DEFAULT_WINDOW_DAYS);
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(ValidationError::single(
            "days",
            format!("Must be between 1 and {MAX_WINDOW_DAYS}"),
        ));
    }
    Ok(now - Duration::days(days))
}
