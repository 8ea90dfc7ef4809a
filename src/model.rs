//! Domain model: contacts, messages, message events, scheduled messages, notes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::ChannelKind;

/// Identity anchor for a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: Option<String>,
    /// Canonical E.164 phone number.
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub twitter_handle: Option<String>,
    pub facebook_id: Option<String>,
    pub tags: Vec<String>,
    pub team_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// A fresh contact with no addresses.
    pub fn new(name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            phone_number: None,
            email: None,
            twitter_handle: None,
            facebook_id: None,
            tags: Vec::new(),
            team_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Direction of a message relative to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "INBOUND",
            Direction::Outbound => "OUTBOUND",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "OUTBOUND" => Direction::Outbound,
            _ => Direction::Inbound,
        }
    }
}

/// Unit of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub channel: ChannelKind,
    pub direction: Direction,
    pub body: String,
    pub media_urls: Vec<String>,
    /// Provider-assigned id; unique when present.
    pub external_id: Option<String>,
    /// Free-form delivery status (queued, sent, delivered, failed, received, ...).
    pub status: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub contact_id: String,
    pub user_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to persist a new message; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel: ChannelKind,
    pub direction: Direction,
    pub body: String,
    pub media_urls: Vec<String>,
    pub external_id: Option<String>,
    pub status: String,
    pub metadata: serde_json::Value,
    pub contact_id: String,
    pub user_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Append-only audit record of a message status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub id: String,
    pub message_id: String,
    pub event_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Status of a deferred outbound intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledStatus {
    Pending,
    Sent,
    Failed,
}

impl ScheduledStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduledStatus::Pending => "pending",
            ScheduledStatus::Sent => "sent",
            ScheduledStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => ScheduledStatus::Sent,
            "failed" => ScheduledStatus::Failed,
            _ => ScheduledStatus::Pending,
        }
    }
}

/// A deferred outbound send, consumed by the scheduler sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessage {
    pub id: String,
    pub contact_id: String,
    pub channel: ChannelKind,
    pub body: String,
    pub media_urls: Vec<String>,
    pub scheduled_for: DateTime<Utc>,
    pub status: ScheduledStatus,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledMessage {
    pub fn new(
        contact_id: impl Into<String>,
        channel: ChannelKind,
        body: impl Into<String>,
        media_urls: Vec<String>,
        scheduled_for: DateTime<Utc>,
        created_by: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            contact_id: contact_id.into(),
            channel,
            body: body.into(),
            media_urls,
            scheduled_for,
            status: ScheduledStatus::Pending,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduledStatus::Pending && self.scheduled_for <= now
    }
}

/// Internal operator note attached to a contact.
///
/// Visible to everyone unless private; a private note is visible to its
/// author and to the users it mentions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub contact_id: String,
    pub title: Option<String>,
    pub content: String,
    pub is_private: bool,
    pub created_by: String,
    pub updated_by: Option<String>,
    /// User ids taken from `@name` tokens in the content.
    pub mentions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn new(
        contact_id: impl Into<String>,
        content: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let content = content.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            contact_id: contact_id.into(),
            title: None,
            mentions: crate::notes::extract_mentions(&content),
            content,
            is_private: false,
            created_by: created_by.into(),
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn visible_to(&self, viewer: Option<&str>) -> bool {
        if !self.is_private {
            return true;
        }
        match viewer {
            Some(user) => self.created_by == user || self.mentions.iter().any(|m| m == user),
            None => false,
        }
    }
}

/// Contact row with thread summary, for the inbox list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    #[serde(flatten)]
    pub contact: Contact,
    pub last_message: Option<LastMessage>,
    pub unread_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub body: String,
    pub channel: ChannelKind,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}
