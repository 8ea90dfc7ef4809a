//! Email sender: Resend HTTP API, or SMTP via lettre.

use std::sync::LazyLock;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use regex::Regex;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::{ChannelKind, ChannelSender, SendOutcome, SendPayload};
use crate::config::{EmailSettings, EmailTransport};
use super::sender::read_reply;
use crate::error::ChannelError;

const DEFAULT_SUBJECT: &str = "Message";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// Syntactic address check. Not RFC 5322; just "something@something.tld".
pub fn is_valid_email(address: &str) -> bool {
    EMAIL_RE.is_match(address)
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: Option<String>,
    message: Option<String>,
}

pub struct EmailSender {
    settings: EmailSettings,
    client: reqwest::Client,
}

impl EmailSender {
    pub fn new(settings: EmailSettings, client: reqwest::Client) -> Self {
        Self { settings, client }
    }

    fn subject(payload: &SendPayload) -> String {
        payload
            .metadata
            .get("subject")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SUBJECT)
            .to_string()
    }

    async fn send_resend(
        &self,
        api_key: &str,
        api_base: &str,
        payload: &SendPayload,
    ) -> Result<Option<String>, ChannelError> {
        let body = serde_json::json!({
            "from": self.settings.from_address,
            "to": payload.to,
            "subject": Self::subject(payload),
            "html": payload.body,
        });

        let resp = self
            .client
            .post(format!("{}/emails", api_base.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        let parsed: ResendResponse = read_reply("email", resp, |r: ResendResponse| r.message).await?;
        Ok(parsed.id)
    }

    async fn send_smtp(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        payload: &SendPayload,
    ) -> Result<Option<String>, ChannelError> {
        let send_failed = |reason: String| ChannelError::SendFailed {
            name: "email".into(),
            reason,
        };

        let message_id = format!("<{}@unified-inbox>", uuid::Uuid::new_v4());
        let email = Message::builder()
            .from(
                self.settings
                    .from_address
                    .parse()
                    .map_err(|e| send_failed(format!("Invalid from address: {e}")))?,
            )
            .to(payload
                .to
                .parse()
                .map_err(|e| send_failed(format!("Invalid to address: {e}")))?)
            .subject(Self::subject(payload))
            .message_id(Some(message_id.clone()))
            .body(payload.body.clone())
            .map_err(|e| send_failed(format!("Failed to build email: {e}")))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?
            .port(port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();

        transport
            .send(email)
            .await
            .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;

        tracing::info!(to = %payload.to, "Email sent over SMTP");
        Ok(Some(message_id))
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn validate(&self, payload: &SendPayload) -> bool {
        payload.is_addressed() && is_valid_email(payload.to.trim())
    }

    async fn send(&self, payload: &SendPayload) -> SendOutcome {
        let result = match &self.settings.transport {
            EmailTransport::Resend { api_key, api_base } => {
                self.send_resend(api_key.expose_secret(), api_base, payload).await
            }
            EmailTransport::Smtp {
                host,
                port,
                username,
                password,
            } => {
                self.send_smtp(host, *port, username, password.expose_secret(), payload)
                    .await
            }
        };
        result.into()
    }
}
