//! Real-time fan-out: an external broker when configured, otherwise a
//! process-local subscriber registry.
//!
//! Local mode only reaches clients connected to this process. Running more
//! than one instance requires the broker.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::RealtimeError;

pub mod broker;
pub mod fanout;
pub mod local;

pub use broker::HttpBroker;
pub use fanout::Fanout;
pub use local::{LocalHub, Subscription};

/// Kind of a real-time event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Connected,
    MessageCreated,
    MessageUpdated,
    MessageRead,
    ContactUpdated,
    NoteCreated,
    NoteUpdated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::MessageCreated => "message:created",
            EventKind::MessageUpdated => "message:updated",
            EventKind::MessageRead => "message:read",
            EventKind::ContactUpdated => "contact:updated",
            EventKind::NoteCreated => "note:created",
            EventKind::NoteUpdated => "note:updated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire frame sent to subscribers: `{"event": ..., "payload": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct Frame<'a> {
    pub event: &'static str,
    pub payload: &'a serde_json::Value,
}

impl<'a> Frame<'a> {
    pub fn new(event: EventKind, payload: &'a serde_json::Value) -> Self {
        Self {
            event: event.as_str(),
            payload,
        }
    }

    pub fn encode(&self) -> Result<String, RealtimeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Logical addressing unit. Each transport maps it to its own channel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Contact(String),
    Team(String),
    /// Viewers currently looking at a contact's thread.
    Presence(String),
    User(String),
}

impl Topic {
    /// Channel name in the process-local registry.
    pub fn local_name(&self) -> String {
        match self {
            Topic::Contact(id) => format!("contact-{id}"),
            Topic::Team(id) => format!("team-{id}"),
            Topic::Presence(id) => format!("presence-contact-{id}"),
            Topic::User(id) => format!("user-{id}"),
        }
    }

    /// Channel name on the external broker.
    pub fn broker_name(&self) -> String {
        match self {
            Topic::Contact(id) => format!("private-contact-{id}"),
            Topic::Team(id) => format!("private-team-{id}"),
            Topic::Presence(id) => format!("presence-contact-{id}"),
            Topic::User(id) => format!("private-user-{id}"),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.local_name())
    }
}

/// Local channel that receives every user-scoped event.
pub const ALL_USERS_CHANNEL: &str = "user-*";

/// A transport that delivers one event to a set of channel names.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn publish(
        &self,
        channels: &[String],
        event: EventKind,
        payload: &serde_json::Value,
    ) -> Result<(), RealtimeError>;
}
