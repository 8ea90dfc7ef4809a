//! Provider webhook payload: field-level validation into a two-variant type.

use std::collections::HashMap;

use crate::channels::ChannelKind;
use crate::error::{FieldError, ValidationError};
use crate::normalize::{classify_channel, normalize_address};

/// Media attachments are numbered `MediaUrl0` through `MediaUrl9`.
pub const MAX_MEDIA: usize = 10;

/// A validated webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedInbound {
    /// Delivery-status update for a message we may already hold.
    StatusUpdate(StatusUpdate),
    /// New content from a contact.
    NewMessage(InboundMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub external_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub external_id: String,
    pub channel: ChannelKind,
    /// Canonical sender address.
    pub from: String,
    /// Canonical recipient address.
    pub to: String,
    pub body: String,
    pub media_urls: Vec<String>,
    pub num_media: u32,
    pub profile_name: Option<String>,
    pub wa_id: Option<String>,
    pub account_sid: Option<String>,
    pub messaging_service_sid: Option<String>,
}

impl InboundMessage {
    /// Provider correlation ids kept on the stored message.
    pub fn metadata(&self) -> serde_json::Value {
        let mut meta = serde_json::json!({
            "providerMessageId": self.external_id,
            "accountSid": self.account_sid,
            "messagingServiceSid": self.messaging_service_sid,
            "toNumber": self.to,
            "numMedia": self.num_media,
        });
        if let Some(wa_id) = &self.wa_id {
            meta["waId"] = serde_json::Value::String(wa_id.clone());
        }
        meta
    }
}

impl ParsedInbound {
    pub fn external_id(&self) -> &str {
        match self {
            ParsedInbound::StatusUpdate(s) => &s.external_id,
            ParsedInbound::NewMessage(m) => &m.external_id,
        }
    }

    /// Validate a form-decoded webhook body.
    ///
    /// A non-empty `MessageStatus` makes the delivery a status update; anything
    /// else is new content and must carry `Body` (possibly empty).
    pub fn parse(form: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let mut errors = Vec::new();
        let optional = |key: &str| {
            form.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let mut required = |key: &str| match optional(key) {
            Some(v) => Some(v),
            None => {
                errors.push(FieldError::new(key, "Required"));
                None
            }
        };

        let message_sid = required("MessageSid");
        let from = required("From");
        let to = required("To");
        let status = optional("MessageStatus");

        if status.is_none() && !form.contains_key("Body") {
            errors.push(FieldError::new("Body", "Required"));
        }
        if let Some(from) = &from
            && !from.chars().any(|c| c.is_ascii_digit())
        {
            errors.push(FieldError::new("From", "Expected a phone number"));
        }

        let num_media = match optional("NumMedia") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) => n,
                Err(_) => {
                    errors.push(FieldError::new("NumMedia", "Expected a non-negative integer"));
                    0
                }
            },
            None => 0,
        };

        let (Some(external_id), Some(from), Some(to)) = (message_sid, from, to) else {
            return Err(ValidationError(errors));
        };
        if !errors.is_empty() {
            return Err(ValidationError(errors));
        }

        if let Some(status) = status {
            return Ok(ParsedInbound::StatusUpdate(StatusUpdate {
                external_id,
                status,
            }));
        }

        let media_urls = (0..MAX_MEDIA)
            .filter_map(|i| optional(&format!("MediaUrl{i}")))
            .collect();

        Ok(ParsedInbound::NewMessage(InboundMessage {
            external_id,
            channel: classify_channel(&from, &to),
            from: normalize_address(&from),
            to: normalize_address(&to),
            body: form.get("Body").cloned().unwrap_or_default(),
            media_urls,
            num_media,
            profile_name: optional("ProfileName"),
            wa_id: optional("WaId"),
            account_sid: optional("AccountSid"),
            messaging_service_sid: optional("MessagingServiceSid"),
        }))
    }
}
