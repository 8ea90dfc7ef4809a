//! `Database` trait: the single async persistence interface.
//!
//! Every component takes `Arc<dyn Database>`; only the libSQL backend touches SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::analytics::MessageStats;
use crate::channels::ChannelKind;
use crate::error::DatabaseError;
use crate::model::{
    Contact, ContactSummary, Message, MessageEvent, NewMessage, Note, ScheduledMessage,
    ScheduledStatus,
};

/// Result of an idempotent message insert keyed on external id.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted(Message),
    /// A row with the same external id already existed; nothing was written.
    Existing(Message),
}

impl InsertOutcome {
    pub fn message(&self) -> &Message {
        match self {
            InsertOutcome::Inserted(m) | InsertOutcome::Existing(m) => m,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

/// Read filter for the inbox contact list.
#[derive(Debug, Clone, Default)]
pub struct ContactFilter {
    /// Case-insensitive substring over name, phone and email.
    pub search: Option<String>,
    /// Only contacts with at least one message on this channel.
    pub channel: Option<ChannelKind>,
    /// `Some(true)`: has unread inbound; `Some(false)`: has none.
    pub unread: Option<bool>,
}

/// Backend-agnostic persistence for contacts, messages and scheduled sends.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Contacts ────────────────────────────────────────────────────

    /// Atomic find-or-create keyed on canonical phone number.
    ///
    /// Returns the contact and whether this call created it.
    async fn find_or_create_contact_by_phone(
        &self,
        phone: &str,
        name: &str,
    ) -> Result<(Contact, bool), DatabaseError>;

    /// Insert an operator-created contact.
    async fn insert_contact(&self, contact: &Contact) -> Result<(), DatabaseError>;

    async fn get_contact(&self, id: &str) -> Result<Option<Contact>, DatabaseError>;

    async fn update_contact_name(&self, id: &str, name: &str) -> Result<(), DatabaseError>;

    /// Overwrite every mutable field of a contact.
    async fn update_contact(&self, contact: &Contact) -> Result<(), DatabaseError>;

    async fn list_contacts(&self) -> Result<Vec<Contact>, DatabaseError>;

    /// Contacts with their last message and unread inbound count, most recent first.
    async fn list_contact_summaries(
        &self,
        filter: &ContactFilter,
    ) -> Result<Vec<ContactSummary>, DatabaseError>;

    /// Write `primary`, move every message, scheduled message and note from
    /// `duplicate_id` to it, then delete the duplicate. All or nothing.
    async fn merge_contacts(&self, primary: &Contact, duplicate_id: &str)
    -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert a message. When `external_id` is set and already present, no
    /// row is written and the existing message is returned.
    async fn insert_message(&self, message: &NewMessage) -> Result<InsertOutcome, DatabaseError>;

    async fn get_message(&self, id: &str) -> Result<Option<Message>, DatabaseError>;

    async fn get_message_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Message>, DatabaseError>;

    async fn update_message_status(&self, id: &str, status: &str) -> Result<(), DatabaseError>;

    /// Timeline for one contact, oldest first.
    async fn list_messages_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Vec<Message>, DatabaseError>;

    /// Set the read flag. Returns the updated message, or `None` if unknown.
    async fn mark_message_read(&self, id: &str) -> Result<Option<Message>, DatabaseError>;

    /// Unread inbound messages across all contacts.
    async fn unread_count(&self) -> Result<u64, DatabaseError>;

    /// Volume and reply aggregates over messages created at or after `since`.
    async fn message_stats(&self, since: DateTime<Utc>) -> Result<MessageStats, DatabaseError>;

    // ── Message events ──────────────────────────────────────────────

    async fn insert_message_event(
        &self,
        message_id: &str,
        event_type: &str,
        metadata: &serde_json::Value,
    ) -> Result<MessageEvent, DatabaseError>;

    /// Insert an event unless the message already has one of `event_type`.
    /// `None` when one was already present.
    async fn insert_message_event_once(
        &self,
        message_id: &str,
        event_type: &str,
        metadata: &serde_json::Value,
    ) -> Result<Option<MessageEvent>, DatabaseError>;

    async fn list_message_events(
        &self,
        message_id: &str,
    ) -> Result<Vec<MessageEvent>, DatabaseError>;

    // ── Scheduled messages ──────────────────────────────────────────

    async fn insert_scheduled(&self, scheduled: &ScheduledMessage) -> Result<(), DatabaseError>;

    async fn get_scheduled(&self, id: &str) -> Result<Option<ScheduledMessage>, DatabaseError>;

    /// Pending, unclaimed items with `scheduled_for <= now`, oldest first.
    async fn due_scheduled(&self, now: DateTime<Utc>)
    -> Result<Vec<ScheduledMessage>, DatabaseError>;

    /// Claim a pending item for one sweep. `true` only for the single caller
    /// whose conditional update matched.
    async fn claim_scheduled(&self, id: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// Move a pending item to a terminal status. `false` if it was not pending.
    async fn finalize_scheduled(
        &self,
        id: &str,
        status: ScheduledStatus,
    ) -> Result<bool, DatabaseError>;

    // ── Notes ───────────────────────────────────────────────────────

    /// Insert a note and its mentions.
    async fn insert_note(&self, note: &Note) -> Result<(), DatabaseError>;

    async fn get_note(&self, id: &str) -> Result<Option<Note>, DatabaseError>;

    /// Overwrite the editable fields and replace the mention set.
    async fn update_note(&self, note: &Note) -> Result<(), DatabaseError>;

    /// Notes on a contact that `viewer` may see, newest first. With no
    /// viewer only public notes are returned.
    async fn list_notes_for_contact(
        &self,
        contact_id: &str,
        viewer: Option<&str>,
    ) -> Result<Vec<Note>, DatabaseError>;
}
