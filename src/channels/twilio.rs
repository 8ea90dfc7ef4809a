//! Twilio sender: SMS and WhatsApp over the Messages REST API.
//!
//! Both channels share one transport. WhatsApp addresses carry the
//! `whatsapp:` prefix on the wire; SMS addresses never do.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::{ChannelKind, ChannelSender, SendOutcome, SendPayload};
use crate::config::TwilioSettings;
use super::sender::read_reply;
use crate::error::ChannelError;
use crate::normalize::{strip_chat_prefix, with_chat_prefix};

#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: Option<String>,
    message: Option<String>,
}

pub struct TwilioSender {
    channel: ChannelKind,
    settings: TwilioSettings,
    client: reqwest::Client,
}

impl TwilioSender {
    pub fn sms(settings: TwilioSettings, client: reqwest::Client) -> Self {
        Self {
            channel: ChannelKind::Sms,
            settings,
            client,
        }
    }

    pub fn whatsapp(settings: TwilioSettings, client: reqwest::Client) -> Self {
        Self {
            channel: ChannelKind::Whatsapp,
            settings,
            client,
        }
    }

    fn api_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.account_sid
        )
    }

    /// Wire form of an address for this sender's channel.
    fn wire_address(&self, address: &str) -> String {
        match self.channel {
            ChannelKind::Whatsapp => with_chat_prefix(address),
            _ => strip_chat_prefix(address).to_string(),
        }
    }

    async fn post_message(&self, payload: &SendPayload) -> Result<Option<String>, ChannelError> {
        let mut form: Vec<(&str, String)> = vec![
            ("To", self.wire_address(&payload.to)),
            ("From", self.wire_address(&self.settings.from_number)),
            ("Body", payload.body.clone()),
        ];
        for url in &payload.media_urls {
            form.push(("MediaUrl", url.clone()));
        }

        let resp = self
            .client
            .post(self.api_url())
            .basic_auth(
                &self.settings.account_sid,
                Some(self.settings.auth_token.expose_secret()),
            )
            .form(&form)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        let parsed: TwilioMessageResponse =
            read_reply(self.channel.as_str(), resp, |r: TwilioMessageResponse| r.message).await?;

        tracing::debug!(channel = %self.channel, sid = ?parsed.sid, "Twilio accepted message");
        Ok(parsed.sid)
    }
}

#[async_trait]
impl ChannelSender for TwilioSender {
    fn channel(&self) -> ChannelKind {
        self.channel
    }

    fn validate(&self, payload: &SendPayload) -> bool {
        payload.is_addressed()
    }

    async fn send(&self, payload: &SendPayload) -> SendOutcome {
        self.post_message(payload).await.into()
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn settings(base: &str) -> TwilioSettings {
        TwilioSettings {
            account_sid: "AC123".into(),
            auth_token: SecretString::from("secret"),
            from_number: "+15550000000".into(),
            api_base: base.to_string(),
        }
    }

    #[tokio::test]
    async fn sms_send_returns_sid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
            .and(header_exists("authorization"))
            .and(body_string_contains("To=%2B15551234567"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"sid": "SM42"})))
            .expect(1)
            .mount(&server)
            .await;

        let sender = TwilioSender::sms(settings(&server.uri()), reqwest::Client::new());
        let outcome = sender.send(&SendPayload::new("+15551234567", "hello")).await;
        assert!(outcome.success);
        assert_eq!(outcome.external_id.as_deref(), Some("SM42"));
    }

    #[tokio::test]
    async fn whatsapp_prefixes_both_addresses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("To=whatsapp%3A%2B15551234567"))
            .and(body_string_contains("From=whatsapp%3A%2B15550000000"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"sid": "SM7"})))
            .expect(1)
            .mount(&server)
            .await;

        let sender = TwilioSender::whatsapp(settings(&server.uri()), reqwest::Client::new());
        let outcome = sender.send(&SendPayload::new("+15551234567", "hola")).await;
        assert_eq!(outcome.external_id.as_deref(), Some("SM7"));
    }

    #[tokio::test]
    async fn provider_error_is_captured_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"code": 21211, "message": "Invalid 'To' Phone Number"})),
            )
            .mount(&server)
            .await;

        let sender = TwilioSender::sms(settings(&server.uri()), reqwest::Client::new());
        let outcome = sender.send(&SendPayload::new("+1", "hello")).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Invalid 'To' Phone Number"));
    }

    #[tokio::test]
    async fn non_json_error_keeps_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("<html>Service Unavailable</html>"))
            .mount(&server)
            .await;

        let sender = TwilioSender::sms(settings(&server.uri()), reqwest::Client::new());
        let outcome = sender.send(&SendPayload::new("+15551234567", "hello")).await;
        assert!(!outcome.success);
        assert!(outcome.external_id.is_none());
        assert!(outcome.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn unreachable_provider_is_captured() {
        let sender = TwilioSender::sms(settings("http://127.0.0.1:1"), reqwest::Client::new());
        let outcome = sender.send(&SendPayload::new("+15551234567", "hello")).await;
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn validate_requires_destination_and_body() {
        let sender = TwilioSender::sms(settings("http://localhost"), reqwest::Client::new());
        assert!(sender.validate(&SendPayload::new("+15551234567", "hi")));
        assert!(!sender.validate(&SendPayload::new("+15551234567", "")));
    }
}
