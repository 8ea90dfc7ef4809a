//! External pub/sub broker over HTTP.
//!
//! Events are POSTed to `{endpoint}/apps/{app_id}/events` as
//! `{"name", "channels", "data"}`. The body is signed with HMAC-SHA256 of the
//! app secret and sent hex-encoded in `X-Broker-Signature`.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use sha2::Sha256;
use tracing::debug;

use super::{EventKind, Publisher};
use crate::config::BrokerConfig;
use crate::error::RealtimeError;

type HmacSha256 = Hmac<Sha256>;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpBroker {
    config: BrokerConfig,
    client: reqwest::Client,
}

impl HttpBroker {
    pub fn new(config: BrokerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PUBLISH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn events_url(&self) -> String {
        format!("{}/apps/{}/events", self.config.endpoint, self.config.app_id)
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, RealtimeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
        RealtimeError::Broker {
            topic: String::new(),
            reason: format!("invalid signing key: {e}"),
        }
    })?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl Publisher for HttpBroker {
    fn name(&self) -> &'static str {
        "broker"
    }

    async fn publish(
        &self,
        channels: &[String],
        event: EventKind,
        payload: &serde_json::Value,
    ) -> Result<(), RealtimeError> {
        let topic = channels.join(",");
        let body = serde_json::to_vec(&serde_json::json!({
            "name": event.as_str(),
            "channels": channels,
            "data": payload,
        }))?;
        let signature = sign(self.config.secret.expose_secret(), &body)?;

        let resp = self
            .client
            .post(self.events_url())
            .header("content-type", "application/json")
            .header("X-Broker-Key", &self.config.key)
            .header("X-Broker-Signature", signature)
            .body(body)
            .send()
            .await
            .map_err(|e| RealtimeError::Broker {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RealtimeError::Broker {
                topic,
                reason: format!("{status}: {text}"),
            });
        }

        debug!(channels = %topic, event = %event, "Broker publish accepted");
        Ok(())
    }
}
