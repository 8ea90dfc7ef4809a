//! Scheduler sweep: finalize every due scheduled message exactly once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::Dispatcher;
use crate::error::{DatabaseError, DispatchError};
use crate::model::{Message, ScheduledMessage, ScheduledStatus};
use crate::store::Database;

/// Per-sweep tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    /// Items another sweep claimed or finalized first.
    pub skipped: usize,
}

pub struct Scheduler {
    db: Arc<dyn Database>,
    dispatcher: Arc<Dispatcher>,
}

impl Scheduler {
    pub fn new(db: Arc<dyn Database>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { db, dispatcher }
    }

    /// Pending items that are due at `now`.
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>, DatabaseError> {
        self.db.due_scheduled(now).await
    }

    /// Run one sweep. Only the initial query can fail; per-item errors are
    /// recorded on the item and logged.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, DatabaseError> {
        let due = self.db.due_scheduled(now).await?;
        let mut report = SweepReport {
            due: due.len(),
            ..Default::default()
        };

        for item in due {
            match self.process(&item, now).await {
                Ok(Some(status)) if status == ScheduledStatus::Sent => report.sent += 1,
                Ok(Some(_)) => report.failed += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(scheduled_id = %item.id, error = %e, "Scheduled item could not be finalized");
                    report.failed += 1;
                }
            }
        }

        if report.due > 0 {
            info!(
                due = report.due,
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                "Scheduler sweep finished"
            );
        }
        Ok(report)
    }

    /// Claim, send and finalize one item. `None` when another sweep owns it
    /// or the item was no longer pending at finalize time.
    async fn process(
        &self,
        item: &ScheduledMessage,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledStatus>, DatabaseError> {
        if !self.db.claim_scheduled(&item.id, now).await? {
            debug!(scheduled_id = %item.id, "Already claimed, skipping");
            return Ok(None);
        }

        let status = settle(item, self.dispatcher.send_scheduled(item).await);

        if !self.db.finalize_scheduled(&item.id, status).await? {
            warn!(scheduled_id = %item.id, status = status.as_str(), "Item left pending state before finalize, skipping");
            return Ok(None);
        }
        Ok(Some(status))
    }
}

/// Terminal status for a send attempt. A provider-accepted send counts as
/// sent even when its history row could not be written.
fn settle(item: &ScheduledMessage, result: Result<Message, DispatchError>) -> ScheduledStatus {
    match result {
        Ok(message) => {
            info!(scheduled_id = %item.id, message_id = %message.id, "Scheduled message sent");
            ScheduledStatus::Sent
        }
        Err(DispatchError::SentNotRecorded {
            external_id, source, ..
        }) => {
            warn!(
                scheduled_id = %item.id,
                external_id = ?external_id,
                error = %source,
                "Scheduled message sent but not recorded"
            );
            ScheduledStatus::Sent
        }
        Err(e) => {
            warn!(scheduled_id = %item.id, channel = %item.channel, error = %e, "Scheduled message failed");
            ScheduledStatus::Failed
        }
    }
}

/// Run the sweep on a fixed interval in-process.
pub fn spawn_ticker(scheduler: Arc<Scheduler>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = scheduler.sweep(Utc::now()).await {
                warn!(error = %e, "Scheduler sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::channels::{ChannelKind, ChannelSender, SendOutcome, SendPayload, SenderFactory};
    use crate::error::ConfigError;
    use crate::model::{Contact, Direction};
    use crate::realtime::{Fanout, LocalHub};
    use crate::store::LibSqlBackend;

    struct CountingSender {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChannelSender for CountingSender {
        fn channel(&self) -> ChannelKind {
            ChannelKind::Sms
        }

        fn validate(&self, payload: &SendPayload) -> bool {
            payload.is_addressed()
        }

        async fn send(&self, payload: &SendPayload) -> SendOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            // Yield so overlapping sweeps actually interleave.
            tokio::task::yield_now().await;
            if payload.body == "boom" {
                SendOutcome::failed("carrier rejected")
            } else {
                SendOutcome::delivered(Some(format!("SM{n}")))
            }
        }
    }

    struct Factory(Arc<CountingSender>);

    impl SenderFactory for Factory {
        fn sender_for(&self, _channel: ChannelKind) -> Result<Arc<dyn ChannelSender>, ConfigError> {
            Ok(self.0.clone())
        }
    }

    struct Harness {
        backend: Arc<LibSqlBackend>,
        db: Arc<dyn Database>,
        sender: Arc<CountingSender>,
        scheduler: Arc<Scheduler>,
        contact: Contact,
    }

    async fn harness() -> Harness {
        let backend = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let db: Arc<dyn Database> = backend.clone();
        let sender = Arc::new(CountingSender {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&db),
            Arc::new(Factory(Arc::clone(&sender))),
            Arc::new(Fanout::local_only(LocalHub::new())),
        ));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&db), dispatcher));
        let (contact, _) = db
            .find_or_create_contact_by_phone("+15551234567", "Ada")
            .await
            .unwrap();
        Harness {
            backend,
            db,
            sender,
            scheduler,
            contact,
        }
    }

    async fn schedule(h: &Harness, contact_id: &str, body: &str, when: DateTime<Utc>) -> ScheduledMessage {
        let item = ScheduledMessage::new(contact_id, ChannelKind::Sms, body, vec![], when, Some("op-1".into()));
        h.db.insert_scheduled(&item).await.unwrap();
        item
    }

    #[tokio::test]
    async fn future_items_are_untouched() {
        let h = harness().await;
        let now = Utc::now();
        let item = schedule(&h, &h.contact.id, "later", now + ChronoDuration::minutes(10)).await;

        let report = h.scheduler.sweep(now).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(h.sender.calls.load(Ordering::SeqCst), 0);
        let stored = h.db.get_scheduled(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ScheduledStatus::Pending);
    }

    #[tokio::test]
    async fn due_item_is_sent_and_recorded() {
        let h = harness().await;
        let now = Utc::now();
        let item = schedule(&h, &h.contact.id, "hello", now - ChronoDuration::minutes(1)).await;

        let report = h.scheduler.sweep(now).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.sent, 1);

        let stored = h.db.get_scheduled(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ScheduledStatus::Sent);
        let history = h.db.list_messages_for_contact(&h.contact.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].direction, Direction::Outbound);
        assert_eq!(history[0].user_id.as_deref(), Some("op-1"));

        // A second sweep finds nothing.
        let again = h.scheduler.sweep(Utc::now()).await.unwrap();
        assert_eq!(again.due, 0);
        assert_eq!(h.sender.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let h = harness().await;
        let now = Utc::now();
        let bad = schedule(&h, &h.contact.id, "boom", now - ChronoDuration::minutes(2)).await;

        let mut no_phone = Contact::new(Some("Mail only".into()));
        no_phone.email = Some("x@example.com".into());
        h.db.insert_contact(&no_phone).await.unwrap();
        let unreachable = schedule(&h, &no_phone.id, "hi", now - ChronoDuration::minutes(1)).await;

        let good = schedule(&h, &h.contact.id, "fine", now).await;

        let report = h.scheduler.sweep(now).await.unwrap();
        assert_eq!(report.due, 3);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 2);

        let status = |id: String| {
            let db = Arc::clone(&h.db);
            async move { db.get_scheduled(&id).await.unwrap().unwrap().status }
        };
        assert_eq!(status(bad.id).await, ScheduledStatus::Failed);
        assert_eq!(status(unreachable.id).await, ScheduledStatus::Failed);
        assert_eq!(status(good.id).await, ScheduledStatus::Sent);

        // Failed sends leave no history.
        assert_eq!(h.db.list_messages_for_contact(&h.contact.id).await.unwrap().len(), 1);
        assert!(h.db.list_messages_for_contact(&no_phone.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_items_are_not_retried() {
        let h = harness().await;
        let now = Utc::now();
        schedule(&h, &h.contact.id, "boom", now).await;

        h.scheduler.sweep(now).await.unwrap();
        let report = h.scheduler.sweep(now + ChronoDuration::minutes(5)).await.unwrap();
        assert_eq!(report.due, 0);
        assert_eq!(h.sender.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_sweeps_send_once() {
        let h = harness().await;
        let now = Utc::now();
        for i in 0..5 {
            schedule(&h, &h.contact.id, &format!("msg {i}"), now - ChronoDuration::seconds(i)).await;
        }

        let sweeps: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = Arc::clone(&h.scheduler);
                tokio::spawn(async move { scheduler.sweep(now).await.unwrap() })
            })
            .collect();
        let mut sent = 0;
        for sweep in sweeps {
            sent += sweep.await.unwrap().sent;
        }

        assert_eq!(sent, 5);
        assert_eq!(h.sender.calls.load(Ordering::SeqCst), 5);
        assert_eq!(h.db.list_messages_for_contact(&h.contact.id).await.unwrap().len(), 5);
    }

    async fn add_trigger(h: &Harness, sql: &str) {
        h.backend.raw_conn().execute(sql, ()).await.unwrap();
    }

    #[tokio::test]
    async fn sent_but_unrecorded_is_finalized_as_sent() {
        let h = harness().await;
        add_trigger(
            &h,
            "CREATE TRIGGER reject_outbound BEFORE INSERT ON messages
             WHEN NEW.direction = 'OUTBOUND'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .await;
        let now = Utc::now();
        let item = schedule(&h, &h.contact.id, "hello", now).await;

        let report = h.scheduler.sweep(now).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(h.sender.calls.load(Ordering::SeqCst), 1);

        let stored = h.db.get_scheduled(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ScheduledStatus::Sent);
        assert!(h.db.list_messages_for_contact(&h.contact.id).await.unwrap().is_empty());

        // Not picked up again, so the recipient is not messaged twice.
        let again = h.scheduler.sweep(now + ChronoDuration::minutes(1)).await.unwrap();
        assert_eq!(again.due, 0);
        assert_eq!(h.sender.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn item_finalized_elsewhere_counts_as_skipped() {
        let h = harness().await;
        // Moves every scheduled item out of pending while the send is in flight.
        add_trigger(
            &h,
            "CREATE TRIGGER settle_elsewhere AFTER INSERT ON messages
             WHEN NEW.direction = 'OUTBOUND'
             BEGIN UPDATE scheduled_messages SET status = 'failed'; END",
        )
        .await;
        let now = Utc::now();
        let item = schedule(&h, &h.contact.id, "hello", now).await;

        let report = h.scheduler.sweep(now).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped, 1);

        // The status written elsewhere is kept.
        let stored = h.db.get_scheduled(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ScheduledStatus::Failed);
    }

    #[tokio::test]
    async fn ticker_runs_sweep() {
        let h = harness().await;
        let item = schedule(&h, &h.contact.id, "tick", Utc::now() - ChronoDuration::seconds(1)).await;

        let handle = spawn_ticker(Arc::clone(&h.scheduler), Duration::from_millis(20));
        let mut status = ScheduledStatus::Pending;
        for _ in 0..50 {
            status = h.db.get_scheduled(&item.id).await.unwrap().unwrap().status;
            if status != ScheduledStatus::Pending {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();
        assert_eq!(status, ScheduledStatus::Sent);
    }
}
