//! Direct-message senders for the social channels.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::{ChannelKind, ChannelSender, SendOutcome, SendPayload};
use crate::config::{FacebookSettings, TwitterSettings};
use super::sender::read_reply;
use crate::error::ChannelError;

#[derive(Debug, Deserialize)]
struct TwitterDmResponse {
    data: Option<TwitterDmData>,
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwitterDmData {
    dm_event_id: Option<String>,
    event_id: Option<String>,
}

pub struct TwitterSender {
    settings: TwitterSettings,
    client: reqwest::Client,
}

impl TwitterSender {
    pub fn new(settings: TwitterSettings, client: reqwest::Client) -> Self {
        Self { settings, client }
    }

    async fn post_dm(&self, payload: &SendPayload) -> Result<Option<String>, ChannelError> {
        let url = format!(
            "{}/2/dm_conversations/with/{}/messages",
            self.settings.api_base.trim_end_matches('/'),
            payload.to.trim().trim_start_matches('@')
        );

        let resp = self
            .client
            .post(url)
            .bearer_auth(self.settings.access_token.expose_secret())
            .json(&serde_json::json!({ "text": payload.body }))
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        let parsed: TwitterDmResponse = read_reply("twitter", resp, |r: TwitterDmResponse| r.detail).await?;

        Ok(parsed.data.and_then(|d| d.dm_event_id.or(d.event_id)))
    }
}

#[async_trait]
impl ChannelSender for TwitterSender {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Twitter
    }

    fn validate(&self, payload: &SendPayload) -> bool {
        payload.is_addressed()
    }

    async fn send(&self, payload: &SendPayload) -> SendOutcome {
        self.post_dm(payload).await.into()
    }
}

#[derive(Debug, Deserialize)]
struct GraphSendResponse {
    message_id: Option<String>,
    error: Option<GraphError>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: Option<String>,
}

pub struct FacebookSender {
    settings: FacebookSettings,
    client: reqwest::Client,
}

impl FacebookSender {
    pub fn new(settings: FacebookSettings, client: reqwest::Client) -> Self {
        Self { settings, client }
    }

    async fn post_message(&self, payload: &SendPayload) -> Result<Option<String>, ChannelError> {
        let url = format!(
            "{}/v18.0/me/messages",
            self.settings.api_base.trim_end_matches('/')
        );

        let resp = self
            .client
            .post(url)
            .query(&[("access_token", self.settings.page_access_token.expose_secret())])
            .json(&serde_json::json!({
                "recipient": { "id": payload.to.trim() },
                "message": { "text": payload.body },
            }))
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        let parsed: GraphSendResponse = read_reply("facebook", resp, |r: GraphSendResponse| {
            r.error.and_then(|e| e.message)
        })
        .await?;

        Ok(parsed.message_id)
    }
}

#[async_trait]
impl ChannelSender for FacebookSender {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Facebook
    }

    fn validate(&self, payload: &SendPayload) -> bool {
        payload.is_addressed()
    }

    async fn send(&self, payload: &SendPayload) -> SendOutcome {
        self.post_message(payload).await.into()
    }
}
