//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! fixed-width RFC 3339 (microseconds, `Z`) so text comparison orders them.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Row, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::analytics::{ChannelCount, DailyCount, DirectionCount, MessageStats, StatusCount};
use crate::channels::ChannelKind;
use crate::error::DatabaseError;
use crate::model::{
    Contact, ContactSummary, Direction, LastMessage, Message, MessageEvent, NewMessage, Note,
    ScheduledMessage, ScheduledStatus,
};
use crate::store::migrations;
use crate::store::traits::{ContactFilter, Database, InsertOutcome};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Raw connection for tests that need to shape the schema.
    #[cfg(test)]
    pub(crate) fn raw_conn(&self) -> &Connection {
        &self.conn
    }

    async fn contact_where(
        &self,
        clause: &str,
        value: &str,
        op: &str,
    ) -> Result<Option<Contact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE {clause} = ?1"),
                params![value],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_contact(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    async fn message_where(
        &self,
        clause: &str,
        value: &str,
        op: &str,
    ) -> Result<Option<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE {clause} = ?1"),
                params![value],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_message(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    async fn summarize(&self, contact: Contact) -> Result<ContactSummary, DatabaseError> {
        let conn = self.conn();

        let mut rows = conn
            .query(
                "SELECT body, channel, created_at, is_read FROM messages WHERE contact_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![contact.id.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("last_message: {e}")))?;
        let last_message = match rows.next().await {
            Ok(Some(row)) => Some(LastMessage {
                body: text(&row, 0)?,
                channel: parse_channel(&text(&row, 1)?)?,
                created_at: parse_datetime(&text(&row, 2)?),
                is_read: row.get::<i64>(3).unwrap_or(0) != 0,
            }),
            Ok(None) => None,
            Err(e) => return Err(DatabaseError::Query(format!("last_message: {e}"))),
        };

        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM messages WHERE contact_id = ?1 AND direction = 'INBOUND' AND is_read = 0",
                params![contact.id.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("contact_unread: {e}")))?;
        let unread_count = match rows.next().await {
            Ok(Some(row)) => row.get::<i64>(0).unwrap_or(0) as u64,
            _ => 0,
        };

        Ok(ContactSummary {
            contact,
            last_message,
            unread_count,
        })
    }

    /// `(key, count)` rows of a two-column aggregate bound to `since`.
    async fn grouped_counts(
        &self,
        sql: &str,
        since: &str,
        op: &str,
    ) -> Result<Vec<(String, u64)>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![since])
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut counts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            counts.push((
                row.get::<String>(0).unwrap_or_default(),
                row.get::<i64>(1).unwrap_or(0) as u64,
            ));
        }
        Ok(counts)
    }

    async fn scalar_since(&self, sql: &str, since: &str, op: &str) -> Result<Option<Row>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![since])
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        rows.next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))
    }
}

/// Replace the mention rows of a note inside `tx`.
async fn write_mentions(tx: &libsql::Transaction, note: &Note, op: &str) -> Result<(), DatabaseError> {
    tx.execute("DELETE FROM note_mentions WHERE note_id = ?1", params![note.id.clone()])
        .await
        .map_err(|e| DatabaseError::Query(format!("{op} mentions: {e}")))?;
    for user_id in &note.mentions {
        tx.execute(
            "INSERT OR IGNORE INTO note_mentions (note_id, user_id) VALUES (?1, ?2)",
            params![note.id.clone(), user_id.clone()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("{op} mentions: {e}")))?;
    }
    Ok(())
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format.
fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

fn parse_channel(s: &str) -> Result<ChannelKind, DatabaseError> {
    s.parse().map_err(DatabaseError::Serialization)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_ts(dt: Option<DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(fmt_ts(dt)),
        None => libsql::Value::Null,
    }
}

fn text(row: &Row, idx: i32) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("column {idx}: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn json_list(row: &Row, idx: i32) -> Vec<String> {
    row.get::<String>(idx)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn json_value(row: &Row, idx: i32) -> serde_json::Value {
    row.get::<String>(idx)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(|| serde_json::json!({}))
}

const CONTACT_COLUMNS: &str = "id, name, phone_number, email, twitter_handle, facebook_id, tags, team_id, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, channel, direction, body, media_urls, external_id, status, is_read, read_at, metadata, contact_id, user_id, sent_at, created_at, updated_at";

const NOTE_COLUMNS: &str = "n.id, n.contact_id, n.title, n.content, n.is_private, n.created_by, n.updated_by, (SELECT json_group_array(nm.user_id) FROM note_mentions nm WHERE nm.note_id = n.id), n.created_at, n.updated_at";

const SCHEDULED_COLUMNS: &str = "id, contact_id, channel, body, media_urls, scheduled_for, status, created_by, created_at, updated_at";

fn row_to_contact(row: &Row) -> Result<Contact, DatabaseError> {
    Ok(Contact {
        id: text(row, 0)?,
        name: row.get::<String>(1).ok(),
        phone_number: row.get::<String>(2).ok(),
        email: row.get::<String>(3).ok(),
        twitter_handle: row.get::<String>(4).ok(),
        facebook_id: row.get::<String>(5).ok(),
        tags: json_list(row, 6),
        team_id: row.get::<String>(7).ok(),
        created_at: parse_datetime(&text(row, 8)?),
        updated_at: parse_datetime(&text(row, 9)?),
    })
}

fn row_to_message(row: &Row) -> Result<Message, DatabaseError> {
    Ok(Message {
        id: text(row, 0)?,
        channel: parse_channel(&text(row, 1)?)?,
        direction: Direction::parse(&text(row, 2)?),
        body: text(row, 3)?,
        media_urls: json_list(row, 4),
        external_id: row.get::<String>(5).ok(),
        status: text(row, 6)?,
        is_read: row.get::<i64>(7).unwrap_or(0) != 0,
        read_at: parse_optional_datetime(row.get::<String>(8).ok()),
        metadata: json_value(row, 9),
        contact_id: text(row, 10)?,
        user_id: row.get::<String>(11).ok(),
        sent_at: parse_optional_datetime(row.get::<String>(12).ok()),
        created_at: parse_datetime(&text(row, 13)?),
        updated_at: parse_datetime(&text(row, 14)?),
    })
}

fn row_to_event(row: &Row) -> Result<MessageEvent, DatabaseError> {
    Ok(MessageEvent {
        id: text(row, 0)?,
        message_id: text(row, 1)?,
        event_type: text(row, 2)?,
        metadata: json_value(row, 3),
        created_at: parse_datetime(&text(row, 4)?),
    })
}

fn row_to_note(row: &Row) -> Result<Note, DatabaseError> {
    Ok(Note {
        id: text(row, 0)?,
        contact_id: text(row, 1)?,
        title: row.get::<String>(2).ok(),
        content: text(row, 3)?,
        is_private: row.get::<i64>(4).unwrap_or(0) != 0,
        created_by: text(row, 5)?,
        updated_by: row.get::<String>(6).ok(),
        mentions: json_list(row, 7),
        created_at: parse_datetime(&text(row, 8)?),
        updated_at: parse_datetime(&text(row, 9)?),
    })
}

fn row_to_scheduled(row: &Row) -> Result<ScheduledMessage, DatabaseError> {
    Ok(ScheduledMessage {
        id: text(row, 0)?,
        contact_id: text(row, 1)?,
        channel: parse_channel(&text(row, 2)?)?,
        body: text(row, 3)?,
        media_urls: json_list(row, 4),
        scheduled_for: parse_datetime(&text(row, 5)?),
        status: ScheduledStatus::parse(&text(row, 6)?),
        created_by: row.get::<String>(7).ok(),
        created_at: parse_datetime(&text(row, 8)?),
        updated_at: parse_datetime(&text(row, 9)?),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Contacts ────────────────────────────────────────────────────

    async fn find_or_create_contact_by_phone(
        &self,
        phone: &str,
        name: &str,
    ) -> Result<(Contact, bool), DatabaseError> {
        let now = fmt_ts(Utc::now());
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO contacts (id, name, phone_number, tags, created_at, updated_at) VALUES (?1, ?2, ?3, '[]', ?4, ?4) ON CONFLICT(phone_number) DO NOTHING",
                params![Uuid::new_v4().to_string(), name, phone, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_or_create_contact: {e}")))?;

        let contact = self
            .contact_where("phone_number", phone, "find_or_create_contact")
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "contact".into(),
                id: phone.to_string(),
            })?;

        let created = inserted == 1;
        if created {
            debug!(contact_id = %contact.id, "Contact created");
        }
        Ok((contact, created))
    }

    async fn insert_contact(&self, contact: &Contact) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO contacts ({CONTACT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    contact.id.clone(),
                    opt_text(contact.name.as_deref()),
                    opt_text(contact.phone_number.as_deref()),
                    opt_text(contact.email.as_deref()),
                    opt_text(contact.twitter_handle.as_deref()),
                    opt_text(contact.facebook_id.as_deref()),
                    to_json(&contact.tags)?,
                    opt_text(contact.team_id.as_deref()),
                    fmt_ts(contact.created_at),
                    fmt_ts(contact.updated_at),
                ],
            )
            .await
            .map_err(|e| match e.to_string() {
                s if s.contains("UNIQUE") => DatabaseError::Constraint(s),
                s => DatabaseError::Query(format!("insert_contact: {s}")),
            })?;
        Ok(())
    }

    async fn get_contact(&self, id: &str) -> Result<Option<Contact>, DatabaseError> {
        self.contact_where("id", id, "get_contact").await
    }

    async fn update_contact_name(&self, id: &str, name: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE contacts SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name, fmt_ts(Utc::now()), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_contact_name: {e}")))?;
        debug!(contact_id = %id, "Contact renamed");
        Ok(())
    }

    async fn update_contact(&self, contact: &Contact) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE contacts SET name = ?1, phone_number = ?2, email = ?3, twitter_handle = ?4, facebook_id = ?5, tags = ?6, team_id = ?7, updated_at = ?8 WHERE id = ?9",
                params![
                    opt_text(contact.name.as_deref()),
                    opt_text(contact.phone_number.as_deref()),
                    opt_text(contact.email.as_deref()),
                    opt_text(contact.twitter_handle.as_deref()),
                    opt_text(contact.facebook_id.as_deref()),
                    to_json(&contact.tags)?,
                    opt_text(contact.team_id.as_deref()),
                    fmt_ts(Utc::now()),
                    contact.id.clone(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_contact: {e}")))?;
        Ok(())
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY created_at ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_contacts: {e}")))?;

        let mut contacts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_contacts: {e}")))?
        {
            contacts.push(row_to_contact(&row)?);
        }
        Ok(contacts)
    }

    async fn list_contact_summaries(
        &self,
        filter: &ContactFilter,
    ) -> Result<Vec<ContactSummary>, DatabaseError> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", q.to_lowercase()));
        let channel = filter.channel.map(|c| c.as_str());
        let unread = match filter.unread {
            Some(flag) => libsql::Value::Integer(flag as i64),
            None => libsql::Value::Null,
        };

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONTACT_COLUMNS} FROM contacts c
                     WHERE (?1 IS NULL
                            OR LOWER(COALESCE(c.name, '')) LIKE ?1
                            OR COALESCE(c.phone_number, '') LIKE ?1
                            OR LOWER(COALESCE(c.email, '')) LIKE ?1)
                       AND (?2 IS NULL OR EXISTS (
                            SELECT 1 FROM messages m WHERE m.contact_id = c.id AND m.channel = ?2))
                       AND (?3 IS NULL OR (?3 = 1) = EXISTS (
                            SELECT 1 FROM messages m
                            WHERE m.contact_id = c.id AND m.direction = 'INBOUND' AND m.is_read = 0))
                     ORDER BY COALESCE(
                        (SELECT MAX(m.created_at) FROM messages m WHERE m.contact_id = c.id),
                        c.updated_at) DESC"
                ),
                params![opt_text(search.as_deref()), opt_text(channel), unread],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_contact_summaries: {e}")))?;

        let mut contacts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_contact_summaries: {e}")))?
        {
            contacts.push(row_to_contact(&row)?);
        }

        let mut summaries = Vec::with_capacity(contacts.len());
        for contact in contacts {
            summaries.push(self.summarize(contact).await?);
        }
        Ok(summaries)
    }

    async fn merge_contacts(
        &self,
        primary: &Contact,
        duplicate_id: &str,
    ) -> Result<(), DatabaseError> {
        let now = fmt_ts(Utc::now());
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("merge_contacts begin: {e}")))?;

        tx.execute(
            "UPDATE messages SET contact_id = ?1, updated_at = ?2 WHERE contact_id = ?3",
            params![primary.id.clone(), now.clone(), duplicate_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("merge_contacts messages: {e}")))?;

        tx.execute(
            "UPDATE scheduled_messages SET contact_id = ?1, updated_at = ?2 WHERE contact_id = ?3",
            params![primary.id.clone(), now.clone(), duplicate_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("merge_contacts scheduled: {e}")))?;

        tx.execute(
            "UPDATE notes SET contact_id = ?1 WHERE contact_id = ?2",
            params![primary.id.clone(), duplicate_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("merge_contacts notes: {e}")))?;

        // Delete before writing the primary: the primary may inherit the
        // duplicate's unique phone number.
        tx.execute("DELETE FROM contacts WHERE id = ?1", params![duplicate_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("merge_contacts delete: {e}")))?;

        tx.execute(
            "UPDATE contacts SET name = ?1, phone_number = ?2, email = ?3, twitter_handle = ?4, facebook_id = ?5, tags = ?6, team_id = ?7, updated_at = ?8 WHERE id = ?9",
            params![
                opt_text(primary.name.as_deref()),
                opt_text(primary.phone_number.as_deref()),
                opt_text(primary.email.as_deref()),
                opt_text(primary.twitter_handle.as_deref()),
                opt_text(primary.facebook_id.as_deref()),
                to_json(&primary.tags)?,
                opt_text(primary.team_id.as_deref()),
                now,
                primary.id.clone(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("merge_contacts primary: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("merge_contacts commit: {e}")))?;

        info!(primary = %primary.id, duplicate = %duplicate_id, "Contacts merged");
        Ok(())
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &NewMessage) -> Result<InsertOutcome, DatabaseError> {
        let now = Utc::now();
        let stored = Message {
            id: Uuid::new_v4().to_string(),
            channel: message.channel,
            direction: message.direction,
            body: message.body.clone(),
            media_urls: message.media_urls.clone(),
            external_id: message.external_id.clone(),
            status: message.status.clone(),
            is_read: false,
            read_at: None,
            metadata: message.metadata.clone(),
            contact_id: message.contact_id.clone(),
            user_id: message.user_id.clone(),
            sent_at: message.sent_at,
            created_at: now,
            updated_at: now,
        };

        let inserted = self
            .conn()
            .execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, ?8, ?9, ?10, ?11, ?12, ?12) ON CONFLICT(external_id) DO NOTHING"
                ),
                params![
                    stored.id.clone(),
                    stored.channel.as_str(),
                    stored.direction.as_str(),
                    stored.body.clone(),
                    to_json(&stored.media_urls)?,
                    opt_text(stored.external_id.as_deref()),
                    stored.status.clone(),
                    to_json(&stored.metadata)?,
                    stored.contact_id.clone(),
                    opt_text(stored.user_id.as_deref()),
                    opt_ts(stored.sent_at),
                    fmt_ts(now),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_message: {e}")))?;

        if inserted == 1 {
            debug!(message_id = %stored.id, channel = %stored.channel, "Message inserted");
            return Ok(InsertOutcome::Inserted(stored));
        }

        let external_id = stored.external_id.as_deref().unwrap_or_default();
        let existing = self
            .get_message_by_external_id(external_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "message".into(),
                id: external_id.to_string(),
            })?;
        debug!(message_id = %existing.id, external_id, "Duplicate external id, insert skipped");
        Ok(InsertOutcome::Existing(existing))
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>, DatabaseError> {
        self.message_where("id", id, "get_message").await
    }

    async fn get_message_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Message>, DatabaseError> {
        self.message_where("external_id", external_id, "get_message_by_external_id")
            .await
    }

    async fn update_message_status(&self, id: &str, status: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE messages SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status, fmt_ts(Utc::now()), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_message_status: {e}")))?;
        debug!(message_id = %id, status, "Message status updated");
        Ok(())
    }

    async fn list_messages_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Vec<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE contact_id = ?1 ORDER BY created_at ASC"
                ),
                params![contact_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_messages_for_contact: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_messages_for_contact: {e}")))?
        {
            messages.push(row_to_message(&row)?);
        }
        Ok(messages)
    }

    async fn mark_message_read(&self, id: &str) -> Result<Option<Message>, DatabaseError> {
        let now = fmt_ts(Utc::now());
        let updated = self
            .conn()
            .execute(
                "UPDATE messages SET is_read = 1, read_at = COALESCE(read_at, ?1), updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_message_read: {e}")))?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_message(id).await
    }

    async fn unread_count(&self) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM messages WHERE direction = 'INBOUND' AND is_read = 0",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("unread_count: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("unread_count: {e}"))),
        }
    }

    async fn message_stats(&self, since: DateTime<Utc>) -> Result<MessageStats, DatabaseError> {
        let since = fmt_ts(since);

        let mut by_channel = Vec::new();
        for (channel, count) in self
            .grouped_counts(
                "SELECT channel, COUNT(*) FROM messages WHERE created_at >= ?1 GROUP BY channel ORDER BY channel",
                &since,
                "stats_by_channel",
            )
            .await?
        {
            by_channel.push(ChannelCount {
                channel: parse_channel(&channel)?,
                count,
            });
        }

        let by_direction = self
            .grouped_counts(
                "SELECT direction, COUNT(*) FROM messages WHERE created_at >= ?1 GROUP BY direction ORDER BY direction",
                &since,
                "stats_by_direction",
            )
            .await?
            .into_iter()
            .map(|(direction, count)| DirectionCount {
                direction: Direction::parse(&direction),
                count,
            })
            .collect();

        let outbound_by_status = self
            .grouped_counts(
                "SELECT status, COUNT(*) FROM messages WHERE created_at >= ?1 AND direction = 'OUTBOUND' GROUP BY status ORDER BY status",
                &since,
                "stats_by_status",
            )
            .await?
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect();

        let daily = self
            .grouped_counts(
                "SELECT substr(created_at, 1, 10) AS day, COUNT(*) FROM messages WHERE created_at >= ?1 GROUP BY day ORDER BY day",
                &since,
                "stats_daily",
            )
            .await?
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect();

        // Reply latency: an outbound message whose previous message on the
        // same contact was inbound.
        let avg_response_secs = self
            .scalar_since(
                "SELECT AVG((julianday(created_at) - julianday(prev_at)) * 86400.0) FROM (
                    SELECT direction, created_at,
                           LAG(direction) OVER w AS prev_direction,
                           LAG(created_at) OVER w AS prev_at
                    FROM messages
                    WINDOW w AS (PARTITION BY contact_id ORDER BY created_at)
                 )
                 WHERE direction = 'OUTBOUND' AND prev_direction = 'INBOUND' AND created_at >= ?1",
                &since,
                "stats_response_time",
            )
            .await?
            .and_then(|row| row.get::<f64>(0).ok());

        let replied_outbound = self
            .scalar_since(
                "SELECT COUNT(*) FROM messages o
                 WHERE o.direction = 'OUTBOUND' AND o.created_at >= ?1
                   AND EXISTS (
                       SELECT 1 FROM messages i
                       WHERE i.contact_id = o.contact_id AND i.direction = 'INBOUND' AND i.created_at >= ?1)",
                &since,
                "stats_replied",
            )
            .await?
            .and_then(|row| row.get::<i64>(0).ok())
            .unwrap_or(0) as u64;

        Ok(MessageStats {
            by_channel,
            by_direction,
            outbound_by_status,
            avg_response_secs,
            replied_outbound,
            daily,
        })
    }

    // ── Message events ──────────────────────────────────────────────

    async fn insert_message_event(
        &self,
        message_id: &str,
        event_type: &str,
        metadata: &serde_json::Value,
    ) -> Result<MessageEvent, DatabaseError> {
        let event = MessageEvent {
            id: Uuid::new_v4().to_string(),
            message_id: message_id.to_string(),
            event_type: event_type.to_string(),
            metadata: metadata.clone(),
            created_at: Utc::now(),
        };
        self.conn()
            .execute(
                "INSERT INTO message_events (id, message_id, event_type, metadata, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.id.clone(),
                    event.message_id.clone(),
                    event.event_type.clone(),
                    to_json(&event.metadata)?,
                    fmt_ts(event.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_message_event: {e}")))?;
        Ok(event)
    }

    async fn insert_message_event_once(
        &self,
        message_id: &str,
        event_type: &str,
        metadata: &serde_json::Value,
    ) -> Result<Option<MessageEvent>, DatabaseError> {
        let event = MessageEvent {
            id: Uuid::new_v4().to_string(),
            message_id: message_id.to_string(),
            event_type: event_type.to_string(),
            metadata: metadata.clone(),
            created_at: Utc::now(),
        };
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO message_events (id, message_id, event_type, metadata, created_at)
                 SELECT ?1, ?2, ?3, ?4, ?5
                 WHERE NOT EXISTS (
                     SELECT 1 FROM message_events WHERE message_id = ?2 AND event_type = ?3
                 )",
                params![
                    event.id.clone(),
                    event.message_id.clone(),
                    event.event_type.clone(),
                    to_json(&event.metadata)?,
                    fmt_ts(event.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_message_event_once: {e}")))?;
        Ok((inserted == 1).then_some(event))
    }

    async fn list_message_events(
        &self,
        message_id: &str,
    ) -> Result<Vec<MessageEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, message_id, event_type, metadata, created_at FROM message_events WHERE message_id = ?1 ORDER BY created_at ASC",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_message_events: {e}")))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_message_events: {e}")))?
        {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }

    // ── Scheduled messages ──────────────────────────────────────────

    async fn insert_scheduled(&self, scheduled: &ScheduledMessage) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO scheduled_messages ({SCHEDULED_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    scheduled.id.clone(),
                    scheduled.contact_id.clone(),
                    scheduled.channel.as_str(),
                    scheduled.body.clone(),
                    to_json(&scheduled.media_urls)?,
                    fmt_ts(scheduled.scheduled_for),
                    scheduled.status.as_str(),
                    opt_text(scheduled.created_by.as_deref()),
                    fmt_ts(scheduled.created_at),
                    fmt_ts(scheduled.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_scheduled: {e}")))?;
        debug!(scheduled_id = %scheduled.id, scheduled_for = %scheduled.scheduled_for, "Scheduled message stored");
        Ok(())
    }

    async fn get_scheduled(&self, id: &str) -> Result<Option<ScheduledMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SCHEDULED_COLUMNS} FROM scheduled_messages WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_scheduled: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_scheduled(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_scheduled: {e}"))),
        }
    }

    async fn due_scheduled(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SCHEDULED_COLUMNS} FROM scheduled_messages
                     WHERE status = 'pending' AND claimed_at IS NULL AND scheduled_for <= ?1
                     ORDER BY scheduled_for ASC"
                ),
                params![fmt_ts(now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("due_scheduled: {e}")))?;

        let mut due = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("due_scheduled: {e}")))?
        {
            due.push(row_to_scheduled(&row)?);
        }
        Ok(due)
    }

    async fn claim_scheduled(&self, id: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let claimed = self
            .conn()
            .execute(
                "UPDATE scheduled_messages SET claimed_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND status = 'pending' AND claimed_at IS NULL",
                params![fmt_ts(now), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_scheduled: {e}")))?;
        Ok(claimed == 1)
    }

    async fn finalize_scheduled(
        &self,
        id: &str,
        status: ScheduledStatus,
    ) -> Result<bool, DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE scheduled_messages SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = 'pending'",
                params![status.as_str(), fmt_ts(Utc::now()), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("finalize_scheduled: {e}")))?;
        debug!(scheduled_id = %id, status = status.as_str(), "Scheduled message finalized");
        Ok(updated == 1)
    }

    // ── Notes ───────────────────────────────────────────────────────

    async fn insert_note(&self, note: &Note) -> Result<(), DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_note begin: {e}")))?;

        tx.execute(
            "INSERT INTO notes (id, contact_id, title, content, is_private, created_by, updated_by, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                note.id.clone(),
                note.contact_id.clone(),
                opt_text(note.title.as_deref()),
                note.content.clone(),
                note.is_private as i64,
                note.created_by.clone(),
                opt_text(note.updated_by.as_deref()),
                fmt_ts(note.created_at),
                fmt_ts(note.updated_at),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_note: {e}")))?;
        write_mentions(&tx, note, "insert_note").await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_note commit: {e}")))?;
        debug!(note_id = %note.id, contact_id = %note.contact_id, "Note created");
        Ok(())
    }

    async fn get_note(&self, id: &str) -> Result<Option<Note>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {NOTE_COLUMNS} FROM notes n WHERE n.id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_note: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_note(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_note: {e}"))),
        }
    }

    async fn update_note(&self, note: &Note) -> Result<(), DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("update_note begin: {e}")))?;

        tx.execute(
            "UPDATE notes SET title = ?1, content = ?2, is_private = ?3, updated_by = ?4, updated_at = ?5 WHERE id = ?6",
            params![
                opt_text(note.title.as_deref()),
                note.content.clone(),
                note.is_private as i64,
                opt_text(note.updated_by.as_deref()),
                fmt_ts(note.updated_at),
                note.id.clone(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("update_note: {e}")))?;
        write_mentions(&tx, note, "update_note").await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("update_note commit: {e}")))?;
        debug!(note_id = %note.id, "Note updated");
        Ok(())
    }

    async fn list_notes_for_contact(
        &self,
        contact_id: &str,
        viewer: Option<&str>,
    ) -> Result<Vec<Note>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {NOTE_COLUMNS} FROM notes n
                     WHERE n.contact_id = ?1
                       AND (n.is_private = 0
                            OR n.created_by = ?2
                            OR EXISTS (
                                SELECT 1 FROM note_mentions nm
                                WHERE nm.note_id = n.id AND nm.user_id = ?2))
                     ORDER BY n.created_at DESC"
                ),
                params![contact_id, opt_text(viewer)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_notes: {e}")))?;

        let mut notes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_notes: {e}")))?
        {
            notes.push(row_to_note(&row)?);
        }
        Ok(notes)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn inbound(contact_id: &str, external_id: Option<&str>, body: &str) -> NewMessage {
        NewMessage {
            channel: ChannelKind::Sms,
            direction: Direction::Inbound,
            body: body.to_string(),
            media_urls: vec![],
            external_id: external_id.map(str::to_string),
            status: "received".into(),
            metadata: serde_json::json!({"providerMessageId": external_id}),
            contact_id: contact_id.to_string(),
            user_id: None,
            sent_at: None,
        }
    }

    // ── Contact tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn find_or_create_is_keyed_on_phone() {
        let db = test_db().await;
        let (first, created) = db
            .find_or_create_contact_by_phone("+15551234567", "Ada")
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.name.as_deref(), Some("Ada"));
        assert_eq!(first.phone_number.as_deref(), Some("+15551234567"));

        let (second, created) = db
            .find_or_create_contact_by_phone("+15551234567", "Someone else")
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn concurrent_find_or_create_yields_one_contact() {
        let db = Arc::new(test_db().await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(async move {
                db.find_or_create_contact_by_phone("+15550001111", "+15550001111")
                    .await
                    .unwrap()
            }));
        }

        let mut ids = Vec::new();
        let mut creators = 0;
        for h in handles {
            let (contact, created) = h.await.unwrap();
            ids.push(contact.id);
            creators += created as usize;
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(creators, 1);
        assert_eq!(db.list_contacts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn insert_and_update_contact() {
        let db = test_db().await;
        let mut contact = Contact::new(Some("Grace".into()));
        contact.email = Some("grace@example.com".into());
        contact.tags = vec!["vip".into()];
        db.insert_contact(&contact).await.unwrap();

        let loaded = db.get_contact(&contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.email.as_deref(), Some("grace@example.com"));
        assert_eq!(loaded.tags, vec!["vip".to_string()]);
        assert!(loaded.phone_number.is_none());

        contact.twitter_handle = Some("grace".into());
        db.update_contact(&contact).await.unwrap();
        let loaded = db.get_contact(&contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.twitter_handle.as_deref(), Some("grace"));

        db.update_contact_name(&contact.id, "Grace H").await.unwrap();
        let loaded = db.get_contact(&contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.name.as_deref(), Some("Grace H"));
    }

    #[tokio::test]
    async fn duplicate_phone_is_constraint_error() {
        let db = test_db().await;
        db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        let mut dup = Contact::new(None);
        dup.phone_number = Some("+15551234567".into());
        let err = db.insert_contact(&dup).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn get_missing_contact_is_none() {
        let db = test_db().await;
        assert!(db.get_contact("nope").await.unwrap().is_none());
    }

    // ── Message tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn insert_message_is_idempotent_on_external_id() {
        let db = test_db().await;
        let (contact, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();

        let first = db.insert_message(&inbound(&contact.id, Some("SM1"), "Hi")).await.unwrap();
        assert!(first.is_new());
        let second = db.insert_message(&inbound(&contact.id, Some("SM1"), "Hi")).await.unwrap();
        assert!(!second.is_new());
        assert_eq!(second.message().id, first.message().id);

        assert_eq!(db.list_messages_for_contact(&contact.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn messages_without_external_id_never_collide() {
        let db = test_db().await;
        let (contact, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        assert!(db.insert_message(&inbound(&contact.id, None, "a")).await.unwrap().is_new());
        assert!(db.insert_message(&inbound(&contact.id, None, "b")).await.unwrap().is_new());
        assert_eq!(db.list_messages_for_contact(&contact.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn message_round_trips_fields() {
        let db = test_db().await;
        let (contact, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        let mut new = inbound(&contact.id, Some("SM9"), "pic");
        new.channel = ChannelKind::Whatsapp;
        new.media_urls = vec!["https://m/1".into(), "https://m/2".into()];
        db.insert_message(&new).await.unwrap();

        let loaded = db.get_message_by_external_id("SM9").await.unwrap().unwrap();
        assert_eq!(loaded.channel, ChannelKind::Whatsapp);
        assert_eq!(loaded.direction, Direction::Inbound);
        assert_eq!(loaded.media_urls, new.media_urls);
        assert_eq!(loaded.metadata["providerMessageId"], "SM9");
        assert!(!loaded.is_read);
    }

    #[tokio::test]
    async fn status_update_and_events() {
        let db = test_db().await;
        let (contact, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        let msg = db.insert_message(&inbound(&contact.id, Some("SM2"), "x")).await.unwrap();
        let id = msg.message().id.clone();

        db.insert_message_event(&id, "received", &serde_json::json!({})).await.unwrap();
        db.update_message_status(&id, "delivered").await.unwrap();
        db.insert_message_event(&id, "delivered", &serde_json::json!({"providerMessageId": "SM2"}))
            .await
            .unwrap();

        assert_eq!(db.get_message(&id).await.unwrap().unwrap().status, "delivered");
        let events = db.list_message_events(&id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "received");
        assert_eq!(events[1].metadata["providerMessageId"], "SM2");
    }

    #[tokio::test]
    async fn event_once_skips_existing_type() {
        let db = Arc::new(test_db().await);
        let (contact, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        let msg = db.insert_message(&inbound(&contact.id, Some("SM9"), "x")).await.unwrap();
        let id = msg.message().id.clone();

        let mut handles = Vec::new();
        for _ in 0..6 {
            let db = Arc::clone(&db);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                db.insert_message_event_once(&id, "received", &serde_json::json!({}))
                    .await
                    .unwrap()
            }));
        }
        let mut written = 0;
        for h in handles {
            written += h.await.unwrap().is_some() as usize;
        }
        assert_eq!(written, 1);

        // Other types are independent.
        assert!(
            db.insert_message_event_once(&id, "delivered", &serde_json::json!({}))
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(db.list_message_events(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn mark_read_and_unread_count() {
        let db = test_db().await;
        let (contact, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        let a = db.insert_message(&inbound(&contact.id, Some("a"), "1")).await.unwrap();
        db.insert_message(&inbound(&contact.id, Some("b"), "2")).await.unwrap();
        let mut out = inbound(&contact.id, Some("c"), "3");
        out.direction = Direction::Outbound;
        db.insert_message(&out).await.unwrap();

        assert_eq!(db.unread_count().await.unwrap(), 2);
        let read = db.mark_message_read(&a.message().id).await.unwrap().unwrap();
        assert!(read.is_read);
        assert!(read.read_at.is_some());
        assert_eq!(db.unread_count().await.unwrap(), 1);

        assert!(db.mark_message_read("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn summaries_filter_and_count() {
        let db = test_db().await;
        let (ada, _) = db.find_or_create_contact_by_phone("+15550000001", "Ada").await.unwrap();
        let (bob, _) = db.find_or_create_contact_by_phone("+15550000002", "Bob").await.unwrap();
        db.insert_message(&inbound(&ada.id, Some("1"), "hello")).await.unwrap();
        let mut wa = inbound(&bob.id, Some("2"), "hola");
        wa.channel = ChannelKind::Whatsapp;
        let wa = db.insert_message(&wa).await.unwrap();
        db.mark_message_read(&wa.message().id).await.unwrap();

        let all = db.list_contact_summaries(&ContactFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let search = ContactFilter {
            search: Some("ADA".into()),
            ..Default::default()
        };
        let found = db.list_contact_summaries(&search).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].unread_count, 1);
        assert_eq!(found[0].last_message.as_ref().unwrap().body, "hello");

        let by_channel = ContactFilter {
            channel: Some(ChannelKind::Whatsapp),
            ..Default::default()
        };
        let found = db.list_contact_summaries(&by_channel).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].contact.id, bob.id);

        let unread = ContactFilter {
            unread: Some(true),
            ..Default::default()
        };
        let found = db.list_contact_summaries(&unread).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].contact.id, ada.id);

        let read = ContactFilter {
            unread: Some(false),
            ..Default::default()
        };
        let found = db.list_contact_summaries(&read).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].contact.id, bob.id);
    }

    #[tokio::test]
    async fn merge_moves_history_and_deletes_duplicate() {
        let db = test_db().await;
        let mut primary = Contact::new(Some("Ada".into()));
        primary.email = Some("ada@example.com".into());
        db.insert_contact(&primary).await.unwrap();
        let (dup, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        db.insert_message(&inbound(&dup.id, Some("m1"), "hi")).await.unwrap();
        let scheduled = ScheduledMessage::new(&dup.id, ChannelKind::Sms, "later", vec![], Utc::now(), None);
        db.insert_scheduled(&scheduled).await.unwrap();

        primary.phone_number = dup.phone_number.clone();
        db.merge_contacts(&primary, &dup.id).await.unwrap();

        assert!(db.get_contact(&dup.id).await.unwrap().is_none());
        let merged = db.get_contact(&primary.id).await.unwrap().unwrap();
        assert_eq!(merged.phone_number.as_deref(), Some("+15551234567"));
        assert_eq!(db.list_messages_for_contact(&primary.id).await.unwrap().len(), 1);
        assert_eq!(
            db.get_scheduled(&scheduled.id).await.unwrap().unwrap().contact_id,
            primary.id
        );
    }

    #[tokio::test]
    async fn merge_carries_notes() {
        let db = test_db().await;
        let primary = Contact::new(Some("Ada".into()));
        db.insert_contact(&primary).await.unwrap();
        let (dup, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        db.insert_note(&Note::new(&dup.id, "VIP", "u1")).await.unwrap();

        db.merge_contacts(&primary, &dup.id).await.unwrap();
        let notes = db.list_notes_for_contact(&primary.id, None).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "VIP");
    }

    // ── Note tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn private_notes_reach_author_and_mentions_only() {
        let db = test_db().await;
        let (c, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();

        let public = Note::new(&c.id, "Prefers email", "alice");
        db.insert_note(&public).await.unwrap();
        let mut private = Note::new(&c.id, "@bob please call back", "alice");
        private.is_private = true;
        private.title = Some("Escalation".into());
        db.insert_note(&private).await.unwrap();

        let seen = |viewer: Option<&'static str>| {
            let db = &db;
            let contact_id = c.id.clone();
            async move {
                db.list_notes_for_contact(&contact_id, viewer)
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|n| n.id)
                    .collect::<Vec<_>>()
            }
        };
        assert_eq!(seen(None).await, vec![public.id.clone()]);
        assert_eq!(seen(Some("carol")).await, vec![public.id.clone()]);
        assert_eq!(seen(Some("alice")).await.len(), 2);
        assert_eq!(seen(Some("bob")).await.len(), 2);

        let loaded = db.get_note(&private.id).await.unwrap().unwrap();
        assert!(loaded.is_private);
        assert_eq!(loaded.title.as_deref(), Some("Escalation"));
        assert_eq!(loaded.mentions, vec!["bob".to_string()]);
        assert_eq!(loaded.created_by, "alice");
    }

    #[tokio::test]
    async fn notes_list_newest_first() {
        let db = test_db().await;
        let (c, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        let mut older = Note::new(&c.id, "first", "u1");
        older.created_at = Utc::now() - Duration::hours(1);
        db.insert_note(&older).await.unwrap();
        let newer = Note::new(&c.id, "second", "u1");
        db.insert_note(&newer).await.unwrap();

        let notes = db.list_notes_for_contact(&c.id, None).await.unwrap();
        assert_eq!(notes[0].id, newer.id);
        assert_eq!(notes[1].id, older.id);
        assert!(db.list_notes_for_contact("other", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_note_replaces_mentions() {
        let db = test_db().await;
        let (c, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        let mut note = Note::new(&c.id, "ask @bob", "alice");
        note.is_private = true;
        db.insert_note(&note).await.unwrap();

        crate::notes::NoteEdit {
            content: Some("ask @carol".into()),
            ..Default::default()
        }
        .apply(&mut note, "alice");
        db.update_note(&note).await.unwrap();

        let loaded = db.get_note(&note.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, "ask @carol");
        assert_eq!(loaded.mentions, vec!["carol".to_string()]);
        assert_eq!(loaded.updated_by.as_deref(), Some("alice"));
        assert!(db.list_notes_for_contact(&c.id, Some("bob")).await.unwrap().is_empty());
        assert_eq!(db.list_notes_for_contact(&c.id, Some("carol")).await.unwrap().len(), 1);
    }

    // ── Analytics tests ─────────────────────────────────────────────

    async fn message_at(db: &LibSqlBackend, mut message: NewMessage, created_at: &str) {
        message.external_id = None;
        let stored = db.insert_message(&message).await.unwrap();
        db.raw_conn()
            .execute(
                "UPDATE messages SET created_at = ?1 WHERE id = ?2",
                params![created_at, stored.message().id.clone()],
            )
            .await
            .unwrap();
    }

    fn outbound(contact_id: &str, status: &str) -> NewMessage {
        NewMessage {
            direction: Direction::Outbound,
            status: status.to_string(),
            user_id: Some("u1".into()),
            ..inbound(contact_id, None, "reply")
        }
    }

    #[tokio::test]
    async fn stats_cover_window_only() {
        let db = test_db().await;
        let (a, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        let (b, _) = db.find_or_create_contact_by_phone("+15557654321", "B").await.unwrap();

        // Before the window.
        message_at(&db, outbound(&a.id, "sent"), "2026-08-01T09:00:00.000000Z").await;
        // A writes, is answered two minutes later, then writes again.
        message_at(&db, inbound(&a.id, None, "hi"), "2026-10-01T10:00:00.000000Z").await;
        message_at(&db, outbound(&a.id, "delivered"), "2026-10-01T10:02:00.000000Z").await;
        message_at(&db, inbound(&a.id, None, "thanks"), "2026-10-01T10:05:00.000000Z").await;
        // B only ever hears from us.
        let mut email = outbound(&b.id, "sent");
        email.channel = ChannelKind::Email;
        message_at(&db, email, "2026-10-02T08:00:00.000000Z").await;

        let since = DateTime::parse_from_rfc3339("2026-09-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let stats = db.message_stats(since).await.unwrap();

        assert_eq!(stats.total(Direction::Inbound), 2);
        assert_eq!(stats.total(Direction::Outbound), 2);
        assert_eq!(
            stats.by_channel,
            vec![
                ChannelCount { channel: ChannelKind::Email, count: 1 },
                ChannelCount { channel: ChannelKind::Sms, count: 3 },
            ]
        );
        assert_eq!(
            stats.outbound_by_status,
            vec![
                StatusCount { status: "delivered".into(), count: 1 },
                StatusCount { status: "sent".into(), count: 1 },
            ]
        );
        let avg = stats.avg_response_secs.unwrap();
        assert!((avg - 120.0).abs() < 0.01, "avg was {avg}");
        assert_eq!(stats.replied_outbound, 1);
        assert_eq!(
            stats.daily,
            vec![
                DailyCount { date: "2026-10-01".into(), count: 3 },
                DailyCount { date: "2026-10-02".into(), count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn stats_on_empty_store() {
        let db = test_db().await;
        let stats = db.message_stats(Utc::now() - Duration::days(30)).await.unwrap();
        assert_eq!(stats, MessageStats::default());
    }

    // ── Scheduled tests ─────────────────────────────────────────────

    #[tokio::test]
    async fn due_excludes_future_and_claimed() {
        let db = test_db().await;
        let (c, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        let now = Utc::now();
        let past = ScheduledMessage::new(&c.id, ChannelKind::Sms, "past", vec![], now - Duration::minutes(1), None);
        let future = ScheduledMessage::new(&c.id, ChannelKind::Sms, "future", vec![], now + Duration::minutes(10), None);
        db.insert_scheduled(&past).await.unwrap();
        db.insert_scheduled(&future).await.unwrap();

        let due = db.due_scheduled(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, past.id);

        assert!(db.claim_scheduled(&past.id, now).await.unwrap());
        assert!(!db.claim_scheduled(&past.id, now).await.unwrap());
        assert!(db.due_scheduled(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn finalize_is_one_shot() {
        let db = test_db().await;
        let (c, _) = db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        let item = ScheduledMessage::new(&c.id, ChannelKind::Sms, "x", vec![], Utc::now(), Some("u1".into()));
        db.insert_scheduled(&item).await.unwrap();

        assert!(db.finalize_scheduled(&item.id, ScheduledStatus::Sent).await.unwrap());
        assert!(!db.finalize_scheduled(&item.id, ScheduledStatus::Failed).await.unwrap());
        let loaded = db.get_scheduled(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ScheduledStatus::Sent);
        assert_eq!(loaded.created_by.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("inbox.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.find_or_create_contact_by_phone("+15551234567", "A").await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert_eq!(db.list_contacts().await.unwrap().len(), 1);
    }

    #[test]
    fn timestamps_sort_lexically() {
        let a = fmt_ts(DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc));
        let b = fmt_ts(DateTime::parse_from_rfc3339("2026-01-01T00:00:00.5Z").unwrap().with_timezone(&Utc));
        assert!(a < b);
        assert_eq!(parse_datetime(&a).to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }
}
