//! Inbound pipeline: validate → resolve contact → persist → fan out.
//!
//! Every write is keyed on the provider's external id, so a provider retry
//! after a failure here never produces a second message or a second
//! `message:created` event.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::payload::{InboundMessage, ParsedInbound, StatusUpdate};
use crate::contacts::resolve_contact;
use crate::error::IngestError;
use crate::model::{Contact, Direction, Message, NewMessage};
use crate::realtime::{EventKind, Fanout};
use crate::store::{Database, InsertOutcome};

/// Status given to freshly received messages.
pub const RECEIVED: &str = "received";

/// What a delivery did.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// New message stored and announced.
    Created { message: Message, contact: Contact },
    /// Same external id already stored; nothing written.
    Duplicate { message_id: String },
    /// Status callback applied to a known message.
    StatusApplied { message: Message },
    /// Status callback for an external id we never stored.
    StatusIgnored { external_id: String },
}

impl IngestOutcome {
    /// Status callbacks are acknowledged with an empty body.
    pub fn is_status_callback(&self) -> bool {
        matches!(
            self,
            IngestOutcome::StatusApplied { .. } | IngestOutcome::StatusIgnored { .. }
        )
    }
}

pub struct InboundPipeline {
    db: Arc<dyn Database>,
    fanout: Arc<Fanout>,
}

impl InboundPipeline {
    pub fn new(db: Arc<dyn Database>, fanout: Arc<Fanout>) -> Self {
        Self { db, fanout }
    }

    /// Validate and ingest a form-decoded webhook body.
    pub async fn ingest_form(
        &self,
        form: &HashMap<String, String>,
    ) -> Result<IngestOutcome, IngestError> {
        let parsed = ParsedInbound::parse(form)?;
        self.ingest(parsed).await
    }

    pub async fn ingest(&self, parsed: ParsedInbound) -> Result<IngestOutcome, IngestError> {
        match parsed {
            ParsedInbound::StatusUpdate(update) => self.apply_status(update).await,
            ParsedInbound::NewMessage(inbound) => self.store_message(inbound).await,
        }
    }

    async fn apply_status(&self, update: StatusUpdate) -> Result<IngestOutcome, IngestError> {
        let Some(mut message) = self.db.get_message_by_external_id(&update.external_id).await?
        else {
            debug!(external_id = %update.external_id, status = %update.status, "Status callback for unknown message");
            return Ok(IngestOutcome::StatusIgnored {
                external_id: update.external_id,
            });
        };

        self.db.update_message_status(&message.id, &update.status).await?;
        self.db
            .insert_message_event(&message.id, &update.status, &event_metadata(&update.external_id))
            .await?;
        message.status = update.status;

        info!(message_id = %message.id, status = %message.status, "Message status updated");

        self.fanout
            .notify_contact(
                &message.contact_id,
                EventKind::MessageUpdated,
                serde_json::json!({ "message": message }),
            )
            .await;

        Ok(IngestOutcome::StatusApplied { message })
    }

    async fn store_message(&self, inbound: InboundMessage) -> Result<IngestOutcome, IngestError> {
        let resolved = resolve_contact(
            self.db.as_ref(),
            &inbound.from,
            inbound.profile_name.as_deref(),
            inbound.wa_id.as_deref(),
        )
        .await?;

        let new = NewMessage {
            channel: inbound.channel,
            direction: Direction::Inbound,
            body: inbound.body.clone(),
            media_urls: inbound.media_urls.clone(),
            external_id: Some(inbound.external_id.clone()),
            status: RECEIVED.to_string(),
            metadata: inbound.metadata(),
            contact_id: resolved.contact.id.clone(),
            user_id: None,
            sent_at: None,
        };

        let stored = self.db.insert_message(&new).await?;
        let is_new = stored.is_new();
        let message = match stored {
            InsertOutcome::Inserted(message) | InsertOutcome::Existing(message) => message,
        };

        // Whoever records the "received" event owns the announcement. A replay
        // of a delivery that failed after the message write finishes it here.
        let recorded = self
            .db
            .insert_message_event_once(&message.id, RECEIVED, &event_metadata(&inbound.external_id))
            .await?;
        if recorded.is_none() {
            info!(external_id = %inbound.external_id, message_id = %message.id, "Replayed webhook, already stored");
            return Ok(IngestOutcome::Duplicate {
                message_id: message.id,
            });
        }
        if !is_new {
            info!(external_id = %inbound.external_id, message_id = %message.id, "Completed interrupted ingest on replay");
        }

        info!(
            message_id = %message.id,
            contact_id = %resolved.contact.id,
            channel = %message.channel,
            "Inbound message stored"
        );

        let contact = resolved.contact.clone();
        if resolved.changed() {
            self.fanout
                .notify_contact(
                    &contact.id,
                    EventKind::ContactUpdated,
                    serde_json::json!({ "contact": contact }),
                )
                .await;
        }

        let mut message_json = serde_json::to_value(&message).unwrap_or_default();
        message_json["contact"] = serde_json::to_value(&contact).unwrap_or_default();
        let payload = serde_json::json!({ "message": message_json, "type": "inbound" });

        if let Some(team_id) = &contact.team_id {
            self.fanout
                .notify_team(team_id, EventKind::MessageCreated, payload.clone())
                .await;
        }
        self.fanout
            .notify_contact(&contact.id, EventKind::MessageCreated, payload)
            .await;

        Ok(IngestOutcome::Created { message, contact })
    }
}

fn event_metadata(external_id: &str) -> serde_json::Value {
    serde_json::json!({
        "timestamp": Utc::now().to_rfc3339(),
        "providerMessageId": external_id,
    })
}
