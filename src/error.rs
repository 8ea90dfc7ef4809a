//! Error types for the unified inbox.

use serde::Serialize;

use crate::channels::ChannelKind;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Provider transport errors raised inside a channel sender.
///
/// Senders never let these escape `send`; they are folded into the
/// `SendOutcome::error` field at the sender boundary.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid provider response from {name}: {reason}")]
    InvalidResponse { name: String, reason: String },
}

/// A single field-level validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Malformed or incomplete payload, with per-field detail.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Validation failed: {}", summarize(.0))]
pub struct ValidationError(pub Vec<FieldError>);

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![FieldError::new(field, message)])
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }
}

fn summarize(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Inbound webhook ingestion errors.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Outbound dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Contact {0} not found")]
    ContactNotFound(String),

    #[error("Contact missing {channel} information")]
    MissingDestination { channel: ChannelKind },

    #[error("Payload rejected by {channel} sender")]
    InvalidPayload { channel: ChannelKind },

    #[error("Delivery on {channel} failed: {reason}")]
    Transport { channel: ChannelKind, reason: String },

    /// The provider accepted the send but the message row could not be written.
    #[error("Delivered on {channel} but not recorded: {source}")]
    SentNotRecorded {
        channel: ChannelKind,
        external_id: Option<String>,
        #[source]
        source: DatabaseError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Contact merge errors.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Contact {0} not found")]
    ContactNotFound(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Real-time publish errors. Always logged and swallowed by the fan-out.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("Broker publish to {topic} failed: {reason}")]
    Broker { topic: String, reason: String },

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
