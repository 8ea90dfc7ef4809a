//! Process-local subscriber registry.
//!
//! Each subscriber owns a bounded queue. A publish that cannot enqueue (queue
//! full or receiver gone) drops that subscriber; it must reconnect.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use super::{EventKind, Frame, Publisher};
use crate::error::RealtimeError;

const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<String>,
}

/// Topic name → open subscriber queues.
pub struct LocalHub {
    topics: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl LocalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Open a stream on `topic`. The first frame is always `connected`.
    pub fn subscribe(self: &Arc<Self>, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let hello = serde_json::json!({ "topic": topic });
        if let Ok(text) = Frame::new(EventKind::Connected, &hello).encode() {
            let _ = tx.try_send(text);
        }

        self.topics
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        debug!(topic, subscriber = id, "Local subscriber added");

        Subscription {
            topic: topic.to_string(),
            id,
            rx,
            hub: Arc::clone(self),
        }
    }

    /// Write a pre-encoded frame to every subscriber of `topic`.
    ///
    /// Returns how many subscribers accepted it.
    pub fn broadcast(&self, topic: &str, text: &str) -> usize {
        let mut delivered = 0;
        let emptied = match self.topics.get_mut(topic) {
            Some(mut subs) => {
                subs.retain(|s| match s.tx.try_send(text.to_string()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(e) => {
                        debug!(topic, subscriber = s.id, error = %e, "Dropping local subscriber");
                        false
                    }
                });
                subs.is_empty()
            }
            None => false,
        };
        if emptied {
            self.topics.remove_if(topic, |_, subs| subs.is_empty());
        }
        delivered
    }

    fn unsubscribe(&self, topic: &str, id: u64) {
        let emptied = match self.topics.get_mut(topic) {
            Some(mut subs) => {
                subs.retain(|s| s.id != id);
                subs.is_empty()
            }
            None => false,
        };
        if emptied {
            self.topics.remove_if(topic, |_, subs| subs.is_empty());
        }
        debug!(topic, subscriber = id, "Local subscriber removed");
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[async_trait]
impl Publisher for LocalHub {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn publish(
        &self,
        channels: &[String],
        event: EventKind,
        payload: &serde_json::Value,
    ) -> Result<(), RealtimeError> {
        let text = Frame::new(event, payload).encode()?;
        for channel in channels {
            let n = self.broadcast(channel, &text);
            debug!(channel = %channel, event = %event, delivered = n, "Local publish");
        }
        Ok(())
    }
}

/// An open subscription. Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    id: u64,
    rx: mpsc::Receiver<String>,
    hub: Arc<LocalHub>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next encoded frame, or `None` once the hub dropped this subscriber.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.topic, self.id);
    }
}
