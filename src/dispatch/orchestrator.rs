//! Outbound dispatch: immediate send or deferred creation.
//!
//! An immediate send that the provider rejects leaves no message row. Only
//! provider-accepted sends become history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::channels::registry::destination_for;
use crate::channels::{ChannelKind, SendPayload, SenderFactory};
use crate::error::{DispatchError, ValidationError};
use crate::model::{Contact, Direction, Message, NewMessage, ScheduledMessage};
use crate::realtime::{EventKind, Fanout};
use crate::store::Database;

/// Status given to provider-accepted outbound messages.
pub const SENT: &str = "sent";

/// An operator's request to send.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub contact_id: String,
    pub channel: ChannelKind,
    pub body: String,
    pub media_urls: Vec<String>,
    /// Defer until this instant instead of sending now.
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Acting operator, if the auth layer supplied one.
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Sent {
        message: Message,
        external_id: Option<String>,
    },
    Scheduled {
        scheduled: ScheduledMessage,
    },
}

pub struct Dispatcher {
    db: Arc<dyn Database>,
    senders: Arc<dyn SenderFactory>,
    fanout: Arc<Fanout>,
}

impl Dispatcher {
    pub fn new(db: Arc<dyn Database>, senders: Arc<dyn SenderFactory>, fanout: Arc<Fanout>) -> Self {
        Self {
            db,
            senders,
            fanout,
        }
    }

    pub async fn dispatch(&self, request: SendRequest) -> Result<DispatchOutcome, DispatchError> {
        if request.body.trim().is_empty() {
            return Err(ValidationError::single("body", "Must not be empty").into());
        }

        let contact = self.load_contact(&request.contact_id).await?;
        let destination = destination_for(&contact, request.channel)
            .ok_or(DispatchError::MissingDestination {
                channel: request.channel,
            })?
            .to_string();

        if let Some(when) = request.scheduled_for {
            let scheduled = ScheduledMessage::new(
                &contact.id,
                request.channel,
                request.body,
                request.media_urls,
                when,
                request.user_id,
            );
            self.db.insert_scheduled(&scheduled).await?;
            info!(
                scheduled_id = %scheduled.id,
                contact_id = %contact.id,
                channel = %scheduled.channel,
                scheduled_for = %when,
                "Send deferred"
            );
            return Ok(DispatchOutcome::Scheduled { scheduled });
        }

        let message = self
            .deliver(
                &contact,
                &destination,
                request.channel,
                &request.body,
                request.media_urls,
                request.user_id,
            )
            .await?;
        let external_id = message.external_id.clone();
        Ok(DispatchOutcome::Sent {
            message,
            external_id,
        })
    }

    /// Send a stored scheduled item now. Used by the sweep.
    pub async fn send_scheduled(&self, item: &ScheduledMessage) -> Result<Message, DispatchError> {
        let contact = self.load_contact(&item.contact_id).await?;
        let destination = destination_for(&contact, item.channel)
            .ok_or(DispatchError::MissingDestination {
                channel: item.channel,
            })?
            .to_string();
        self.deliver(
            &contact,
            &destination,
            item.channel,
            &item.body,
            item.media_urls.clone(),
            item.created_by.clone(),
        )
        .await
    }

    async fn load_contact(&self, id: &str) -> Result<Contact, DispatchError> {
        self.db
            .get_contact(id)
            .await?
            .ok_or_else(|| DispatchError::ContactNotFound(id.to_string()))
    }

    /// Sender call, persistence and fan-out shared by both send paths.
    async fn deliver(
        &self,
        contact: &Contact,
        destination: &str,
        channel: ChannelKind,
        body: &str,
        media_urls: Vec<String>,
        user_id: Option<String>,
    ) -> Result<Message, DispatchError> {
        let sender = self.senders.sender_for(channel)?;
        let payload = SendPayload::new(destination, body).with_media(media_urls);
        if !sender.validate(&payload) {
            return Err(DispatchError::InvalidPayload { channel });
        }

        let outcome = sender.send(&payload).await;
        if !outcome.success {
            let reason = outcome
                .error
                .unwrap_or_else(|| "Failed to send message".to_string());
            warn!(contact_id = %contact.id, channel = %channel, error = %reason, "Outbound send failed");
            return Err(DispatchError::Transport { channel, reason });
        }

        let now = Utc::now();
        let stored = match self
            .db
            .insert_message(&NewMessage {
                channel,
                direction: Direction::Outbound,
                body: body.to_string(),
                media_urls: payload.media_urls,
                external_id: outcome.external_id.clone(),
                status: SENT.to_string(),
                metadata: serde_json::json!({}),
                contact_id: contact.id.clone(),
                user_id,
                sent_at: Some(now),
            })
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                error!(
                    contact_id = %contact.id,
                    channel = %channel,
                    external_id = ?outcome.external_id,
                    error = %e,
                    "Message delivered but not recorded"
                );
                return Err(DispatchError::SentNotRecorded {
                    channel,
                    external_id: outcome.external_id,
                    source: e,
                });
            }
        };
        let message = stored.message().clone();

        info!(
            message_id = %message.id,
            contact_id = %contact.id,
            channel = %channel,
            external_id = ?message.external_id,
            "Outbound message sent"
        );

        let mut message_json = serde_json::to_value(&message).unwrap_or_default();
        message_json["contact"] = serde_json::to_value(contact).unwrap_or_default();
        self.fanout
            .notify_contact(
                &contact.id,
                EventKind::MessageCreated,
                serde_json::json!({ "message": message_json, "type": "outbound" }),
            )
            .await;

        Ok(message)
    }
}
