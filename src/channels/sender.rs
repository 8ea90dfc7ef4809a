//! The two-method sender contract and the factory that picks a variant.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{ChannelKind, EmailSender, FacebookSender, TwilioSender, TwitterSender};
use crate::config::ChannelSettings;
use crate::error::{ChannelError, ConfigError};

/// Provider calls give up after this long; retry policy belongs to callers.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

/// What to deliver and where.
#[derive(Debug, Clone, Default)]
pub struct SendPayload {
    pub to: String,
    pub body: String,
    pub media_urls: Vec<String>,
    /// Channel-specific extras (e.g. `subject` for email).
    pub metadata: serde_json::Value,
}

impl SendPayload {
    pub fn new(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            body: body.into(),
            media_urls: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_media(mut self, media_urls: Vec<String>) -> Self {
        self.media_urls = media_urls;
        self
    }

    /// Destination and body are both present.
    pub fn is_addressed(&self) -> bool {
        !self.to.trim().is_empty() && !self.body.trim().is_empty()
    }
}

/// Result of a send attempt. Provider failures land in `error`, never in a panic
/// or an `Err` past the sender boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub success: bool,
    pub external_id: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn delivered(external_id: Option<String>) -> Self {
        Self {
            success: true,
            external_id,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            external_id: None,
            error: Some(reason.into()),
        }
    }
}

impl From<Result<Option<String>, ChannelError>> for SendOutcome {
    fn from(result: Result<Option<String>, ChannelError>) -> Self {
        match result {
            Ok(external_id) => SendOutcome::delivered(external_id),
            Err(e) => SendOutcome::failed(e.to_string()),
        }
    }
}

/// Read a provider reply. The status is checked before the body is decoded,
/// so an HTML or empty error page still reports the HTTP status. `detail`
/// pulls the provider's own message out of a JSON error body.
pub(crate) async fn read_reply<T: DeserializeOwned>(
    name: &str,
    resp: reqwest::Response,
    detail: impl FnOnce(T) -> Option<String>,
) -> Result<T, ChannelError> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| ChannelError::Http(e.to_string()))?;

    if !status.is_success() {
        let reason = match serde_json::from_str::<T>(&body).ok().and_then(detail) {
            Some(message) => format!("{status}: {message}"),
            None => format!("provider returned {status}"),
        };
        return Err(ChannelError::SendFailed {
            name: name.to_string(),
            reason,
        });
    }

    serde_json::from_str(&body).map_err(|e| ChannelError::InvalidResponse {
        name: name.to_string(),
        reason: format!("{status}: {e}"),
    })
}

/// Per-channel delivery contract.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Channel this sender delivers on.
    fn channel(&self) -> ChannelKind;

    /// Cheap structural check; no I/O.
    fn validate(&self, payload: &SendPayload) -> bool;

    /// Issue the provider call.
    async fn send(&self, payload: &SendPayload) -> SendOutcome;
}

/// Build the sender for a channel from the credential bag.
pub fn create_sender(
    channel: ChannelKind,
    settings: &ChannelSettings,
    client: reqwest::Client,
) -> Result<Arc<dyn ChannelSender>, ConfigError> {
    let missing = |key: &str, hint: &str| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    };

    let sender: Arc<dyn ChannelSender> = match channel {
        ChannelKind::Sms | ChannelKind::Whatsapp => {
            let twilio = settings.twilio.as_ref().ok_or_else(|| {
                missing(
                    "TWILIO_ACCOUNT_SID",
                    "Set TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN and TWILIO_PHONE_NUMBER",
                )
            })?;
            if channel == ChannelKind::Whatsapp {
                Arc::new(TwilioSender::whatsapp(twilio.clone(), client))
            } else {
                Arc::new(TwilioSender::sms(twilio.clone(), client))
            }
        }
        ChannelKind::Email => {
            let email = settings
                .email
                .as_ref()
                .ok_or_else(|| missing("RESEND_API_KEY", "Set RESEND_API_KEY or SMTP_HOST"))?;
            Arc::new(EmailSender::new(email.clone(), client))
        }
        ChannelKind::Twitter => {
            let twitter = settings
                .twitter
                .as_ref()
                .ok_or_else(|| missing("TWITTER_ACCESS_TOKEN", "Set TWITTER_ACCESS_TOKEN"))?;
            Arc::new(TwitterSender::new(twitter.clone(), client))
        }
        ChannelKind::Facebook => {
            let facebook = settings.facebook.as_ref().ok_or_else(|| {
                missing("FACEBOOK_PAGE_ACCESS_TOKEN", "Set FACEBOOK_PAGE_ACCESS_TOKEN")
            })?;
            Arc::new(FacebookSender::new(facebook.clone(), client))
        }
    };
    Ok(sender)
}

/// Source of senders for the dispatch layer.
pub trait SenderFactory: Send + Sync {
    fn sender_for(&self, channel: ChannelKind) -> Result<Arc<dyn ChannelSender>, ConfigError>;
}

/// Factory backed by static channel settings and one shared HTTP client.
pub struct ConfiguredSenders {
    settings: ChannelSettings,
    client: reqwest::Client,
}

impl ConfiguredSenders {
    pub fn new(settings: ChannelSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self { settings, client }
    }
}

impl SenderFactory for ConfiguredSenders {
    fn sender_for(&self, channel: ChannelKind) -> Result<Arc<dyn ChannelSender>, ConfigError> {
        create_sender(channel, &self.settings, self.client.clone())
    }
}
