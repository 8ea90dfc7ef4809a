//! The single entry point internal components use to raise real-time events.
//!
//! Broker first when configured; any broker failure retries once through the
//! local hub. Failures on both paths are logged and never returned.

use std::sync::Arc;

use tracing::{info, warn};

use super::{ALL_USERS_CHANNEL, EventKind, HttpBroker, LocalHub, Publisher, Topic};
use crate::config::RealtimeConfig;
use crate::error::RealtimeError;

pub struct Fanout {
    broker: Option<Arc<dyn Publisher>>,
    local: Arc<LocalHub>,
}

impl Fanout {
    /// Pick the transport from configuration. The local hub is always kept
    /// for fallback and for in-process subscribers.
    pub fn from_config(config: &RealtimeConfig, local: Arc<LocalHub>) -> Self {
        let broker = config
            .broker
            .clone()
            .map(|b| Arc::new(HttpBroker::new(b)) as Arc<dyn Publisher>);
        let fanout = Self { broker, local };
        info!(mode = fanout.mode(), "Real-time fan-out ready");
        fanout
    }

    pub fn local_only(local: Arc<LocalHub>) -> Self {
        Self {
            broker: None,
            local,
        }
    }

    pub fn with_broker(broker: Arc<dyn Publisher>, local: Arc<LocalHub>) -> Self {
        Self {
            broker: Some(broker),
            local,
        }
    }

    pub fn mode(&self) -> &'static str {
        self.broker.as_ref().map(|b| b.name()).unwrap_or("local")
    }

    pub fn hub(&self) -> &Arc<LocalHub> {
        &self.local
    }

    /// Deliver an event to a topic. Best effort.
    pub async fn notify(&self, topic: Topic, event: EventKind, payload: serde_json::Value) {
        if let Some(broker) = &self.broker {
            match broker.publish(&[topic.broker_name()], event, &payload).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(topic = %topic, event = %event, error = %e, "Broker publish failed, falling back to local");
                }
            }
        }

        if let Err(e) = self.publish_local(&topic, event, &payload).await {
            warn!(topic = %topic, event = %event, error = %e, "Real-time delivery failed");
        }
    }

    pub async fn notify_contact(&self, contact_id: &str, event: EventKind, payload: serde_json::Value) {
        self.notify(Topic::Contact(contact_id.to_string()), event, payload)
            .await;
    }

    pub async fn notify_team(&self, team_id: &str, event: EventKind, payload: serde_json::Value) {
        self.notify(Topic::Team(team_id.to_string()), event, payload).await;
    }

    pub async fn notify_user(&self, user_id: &str, event: EventKind, payload: serde_json::Value) {
        self.notify(Topic::User(user_id.to_string()), event, payload).await;
    }

    pub async fn notify_viewers(&self, contact_id: &str, event: EventKind, payload: serde_json::Value) {
        self.notify(Topic::Presence(contact_id.to_string()), event, payload)
            .await;
    }

    /// Local delivery. Contact events also reach the acting user's channel and
    /// the all-users channel, the latter with `contactId` added.
    async fn publish_local(
        &self,
        topic: &Topic,
        event: EventKind,
        payload: &serde_json::Value,
    ) -> Result<(), RealtimeError> {
        let mut channels = vec![topic.local_name()];
        let Topic::Contact(contact_id) = topic else {
            return self.local.publish(&channels, event, payload).await;
        };

        if let Some(user_id) = payload_user_id(payload) {
            channels.push(Topic::User(user_id.to_string()).local_name());
        }
        self.local.publish(&channels, event, payload).await?;

        let tagged = with_contact_id(payload, contact_id);
        self.local
            .publish(&[ALL_USERS_CHANNEL.to_string()], event, &tagged)
            .await
    }
}

/// `userId` at the top level, or on an embedded `message`.
fn payload_user_id(payload: &serde_json::Value) -> Option<&str> {
    payload
        .get("userId")
        .or_else(|| payload.get("message").and_then(|m| m.get("userId")))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

fn with_contact_id(payload: &serde_json::Value, contact_id: &str) -> serde_json::Value {
    match payload {
        serde_json::Value::Object(map) => {
            let mut map = map.clone();
            map.insert("contactId".into(), contact_id.into());
            serde_json::Value::Object(map)
        }
        other => serde_json::json!({ "contactId": contact_id, "data": other }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct FailingBroker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Publisher for FailingBroker {
        fn name(&self) -> &'static str {
            "broker"
        }

        async fn publish(
            &self,
            channels: &[String],
            _event: EventKind,
            _payload: &serde_json::Value,
        ) -> Result<(), RealtimeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RealtimeError::Broker {
                topic: channels.join(","),
                reason: "unreachable".into(),
            })
        }
    }

    struct OkBroker;

    #[async_trait]
    impl Publisher for OkBroker {
        fn name(&self) -> &'static str {
            "broker"
        }

        async fn publish(
            &self,
            _channels: &[String],
            _event: EventKind,
            _payload: &serde_json::Value,
        ) -> Result<(), RealtimeError> {
            Ok(())
        }
    }

    fn parse(text: &str) -> serde_json::Value {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn local_mode_reaches_contact_user_and_all_users() {
        let hub = LocalHub::new();
        let fanout = Fanout::local_only(Arc::clone(&hub));
        let mut contact = hub.subscribe("contact-c1");
        let mut user = hub.subscribe("user-u1");
        let mut all = hub.subscribe("user-*");
        for s in [&mut contact, &mut user, &mut all] {
            s.recv().await.unwrap();
        }

        fanout
            .notify_contact(
                "c1",
                EventKind::MessageCreated,
                serde_json::json!({"message": {"id": "m1", "userId": "u1"}}),
            )
            .await;

        assert_eq!(parse(&contact.recv().await.unwrap())["event"], "message:created");
        assert_eq!(parse(&user.recv().await.unwrap())["payload"]["message"]["id"], "m1");
        assert_eq!(parse(&all.recv().await.unwrap())["payload"]["contactId"], "c1");
    }

    #[tokio::test]
    async fn broker_failure_falls_back_to_local() {
        let hub = LocalHub::new();
        let broker = Arc::new(FailingBroker {
            calls: AtomicUsize::new(0),
        });
        let fanout = Fanout::with_broker(broker.clone(), Arc::clone(&hub));
        let mut sub = hub.subscribe("contact-c1");
        sub.recv().await.unwrap();

        fanout
            .notify_contact("c1", EventKind::MessageUpdated, serde_json::json!({"id": "m1"}))
            .await;

        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(parse(&sub.recv().await.unwrap())["event"], "message:updated");
    }

    #[tokio::test]
    async fn broker_success_skips_local() {
        let hub = LocalHub::new();
        let fanout = Fanout::with_broker(Arc::new(OkBroker), Arc::clone(&hub));
        let mut sub = hub.subscribe("contact-c1");
        sub.recv().await.unwrap();

        fanout
            .notify_contact("c1", EventKind::MessageCreated, serde_json::json!({}))
            .await;

        let next = tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await;
        assert!(next.is_err());
        assert_eq!(fanout.mode(), "broker");
    }

    #[tokio::test]
    async fn no_subscribers_is_not_an_error() {
        let fanout = Fanout::local_only(LocalHub::new());
        fanout
            .notify_team("t1", EventKind::ContactUpdated, serde_json::json!({"id": "c1"}))
            .await;
        assert_eq!(fanout.mode(), "local");
    }

    #[test]
    fn contact_id_tagging() {
        let tagged = with_contact_id(&serde_json::json!({"a": 1}), "c9");
        assert_eq!(tagged["contactId"], "c9");
        assert_eq!(tagged["a"], 1);
        let wrapped = with_contact_id(&serde_json::json!([1, 2]), "c9");
        assert_eq!(wrapped["data"], serde_json::json!([1, 2]));
    }
}
