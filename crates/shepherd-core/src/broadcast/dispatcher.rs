//! Batched, rate-limited delivery of one message to many recipients.
//!
//! Recipients are sent to one at a time. After every full batch the
//! dispatcher sleeps for a fixed delay (never after the last batch) so the
//! email provider's rate limit is respected. A failed recipient is recorded
//! and the loop moves on; nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ValidationError;

use super::progress::{BroadcastProgress, BroadcastReport, DeliveryFailure};
use super::recipients::partition_eligible;
use super::sender::{MessageSender, OutgoingMessage, Recipient};

/// Recipients per batch
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Pause between batches in milliseconds
pub const DEFAULT_BATCH_DELAY_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOptions {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
        }
    }
}

/// Number of batches needed for `total` recipients
pub fn batch_count(total: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    total.div_ceil(batch_size)
}

/// A validated broadcast, ready to run
#[derive(Debug, Clone)]
pub struct Broadcast {
    recipients: Vec<Recipient>,
    message: OutgoingMessage,
    options: BroadcastOptions,
}

impl Broadcast {
    pub fn new(
        recipients: Vec<Recipient>,
        message: OutgoingMessage,
        options: BroadcastOptions,
    ) -> Result<Self, ValidationError> {
        if message.body.trim().is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        if options.batch_size == 0 {
            return Err(ValidationError::InvalidBatchSize);
        }
        Ok(Self { recipients, message, options })
    }

    /// Deliver to every eligible recipient, publishing a progress snapshot on
    /// each state change. Runs to completion; per-recipient failures end up
    /// in the report.
    pub async fn run<S>(self, sender: &S, progress: &watch::Sender<BroadcastProgress>) -> BroadcastReport
    where
        S: MessageSender + ?Sized,
    {
        let channel = sender.channel();
        let (eligible, skipped) = partition_eligible(self.recipients, channel);
        let total = eligible.len();
        let batches = batch_count(total, self.options.batch_size);

        info!(%channel, total, skipped, batches, "Starting broadcast");
        let mut state = BroadcastProgress::new(total, skipped, batches);
        progress.send_replace(state.clone());

        let mut failures = Vec::new();

        for (index, batch) in eligible.chunks(self.options.batch_size).enumerate() {
            state.batch = index + 1;
            debug!(batch = state.batch, size = batch.len(), "Sending batch");

            for recipient in batch {
                let name = recipient.name();
                state.current = Some(name.clone());
                progress.send_replace(state.clone());

                let message = self.message.personalize(recipient);
                match sender.deliver(recipient, &message).await {
                    Ok(()) => state.sent += 1,
                    Err(e) => {
                        warn!(recipient = %recipient.id, %channel, error = %e, "Delivery failed");
                        state.failed += 1;
                        failures.push(DeliveryFailure {
                            recipient_id: recipient.id.clone(),
                            recipient: name,
                            error: e.to_string(),
                        });
                    }
                }
                progress.send_replace(state.clone());
            }

            if state.batch < batches {
                state.current = None;
                state.waiting = true;
                progress.send_replace(state.clone());
                tokio::time::sleep(self.options.batch_delay).await;
                state.waiting = false;
            }
        }

        state.current = None;
        state.finished = true;
        progress.send_replace(state.clone());

        info!(sent = state.sent, failed = state.failed, skipped, "Broadcast finished");
        BroadcastReport {
            total,
            sent: state.sent,
            failed: state.failed,
            skipped,
            failures,
        }
    }

    /// Run on a background task. The returned handle can be watched or
    /// ignored; the dispatch continues either way.
    pub fn spawn<S>(self, sender: Arc<S>) -> BroadcastHandle
    where
        S: MessageSender + ?Sized + 'static,
    {
        let (tx, rx) = watch::channel(BroadcastProgress::default());
        let task = tokio::spawn(async move { self.run(sender.as_ref(), &tx).await });
        BroadcastHandle { progress: rx, task }
    }
}

/// A broadcast running in the background
pub struct BroadcastHandle {
    progress: watch::Receiver<BroadcastProgress>,
    task: JoinHandle<BroadcastReport>,
}

impl BroadcastHandle {
    /// Latest progress snapshot
    pub fn snapshot(&self) -> BroadcastProgress {
        self.progress.borrow().clone()
    }

    /// A receiver for rendering; dropping it does not affect the dispatch
    pub fn subscribe(&self) -> watch::Receiver<BroadcastProgress> {
        self.progress.clone()
    }

    /// Wait for the final report
    pub async fn wait(self) -> Result<BroadcastReport> {
        self.task.await.context("Broadcast task panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::sender::{Channel, DeliveryError};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Records who was attempted and when; fails for listed ids
    struct MockSender {
        channel: Channel,
        fail_ids: HashSet<String>,
        attempts: Mutex<Vec<(String, Instant)>>,
    }

    impl MockSender {
        fn new(channel: Channel, fail_ids: &[&str]) -> Self {
            Self {
                channel,
                fail_ids: fail_ids.iter().map(|s| s.to_string()).collect(),
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempted_ids(&self) -> Vec<String> {
            self.attempts.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
        }
    }

    #[async_trait]
    impl MessageSender for MockSender {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn deliver(&self, recipient: &Recipient, _message: &OutgoingMessage) -> Result<(), DeliveryError> {
            self.attempts.lock().unwrap().push((recipient.id.clone(), Instant::now()));
            tokio::task::yield_now().await;
            if self.fail_ids.contains(&recipient.id) {
                return Err(anyhow::anyhow!("mailbox unavailable").into());
            }
            Ok(())
        }
    }

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| Recipient {
                id: format!("m{}", i),
                first_name: format!("Person{}", i),
                last_name: "Test".to_string(),
                email: Some(format!("p{}@example.org", i)),
                user_id: Some(format!("uid{}", i)),
            })
            .collect()
    }

    fn message() -> OutgoingMessage {
        OutgoingMessage::new(Some("Hello".to_string()), "Hi {first_name}")
    }

    #[test]
    fn test_batch_count() {
        assert_eq!(batch_count(0, 10), 0);
        assert_eq!(batch_count(1, 10), 1);
        assert_eq!(batch_count(10, 10), 1);
        assert_eq!(batch_count(11, 10), 2);
        assert_eq!(batch_count(23, 10), 3);
        assert_eq!(batch_count(5, 0), 0);
    }

    #[test]
    fn test_broadcast_validation() {
        let bad_body = Broadcast::new(recipients(1), OutgoingMessage::new(None, "  "), BroadcastOptions::default());
        assert_eq!(bad_body.unwrap_err(), ValidationError::EmptyMessage);

        let options = BroadcastOptions { batch_size: 0, ..Default::default() };
        let bad_batch = Broadcast::new(recipients(1), message(), options);
        assert_eq!(bad_batch.unwrap_err(), ValidationError::InvalidBatchSize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_23_recipients_three_batches_two_delays() {
        let sender = MockSender::new(Channel::Email, &[]);
        let (tx, _rx) = watch::channel(BroadcastProgress::default());
        let broadcast = Broadcast::new(recipients(23), message(), BroadcastOptions::default()).unwrap();

        let start = Instant::now();
        let report = broadcast.run(&sender, &tx).await;

        assert_eq!(report.sent, 23);
        assert_eq!(report.failed, 0);
        assert_eq!(report.total, 23);
        // Two inter-batch delays, none after the final batch
        assert_eq!(start.elapsed(), Duration::from_millis(4000));

        let attempts = sender.attempts.lock().unwrap();
        let offsets: Vec<u128> = attempts.iter().map(|(_, at)| (*at - start).as_millis()).collect();
        assert!(offsets[..10].iter().all(|&ms| ms == 0));
        assert!(offsets[10..20].iter().all(|&ms| ms == 2000));
        assert!(offsets[20..].iter().all(|&ms| ms == 4000));
        assert_eq!(offsets.len(), 23);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_multiple_has_no_trailing_delay() {
        let sender = MockSender::new(Channel::Email, &[]);
        let (tx, _rx) = watch::channel(BroadcastProgress::default());
        let options = BroadcastOptions { batch_size: 5, batch_delay: Duration::from_millis(750) };
        let start = Instant::now();
        let report = Broadcast::new(recipients(10), message(), options).unwrap().run(&sender, &tx).await;
        assert_eq!(report.sent, 10);
        assert_eq!(start.elapsed(), Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_broadcast() {
        let sender = MockSender::new(Channel::Email, &["m1", "m7"]);
        let (tx, rx) = watch::channel(BroadcastProgress::default());
        let report = Broadcast::new(recipients(12), message(), BroadcastOptions::default())
            .unwrap()
            .run(&sender, &tx)
            .await;

        assert_eq!(report.sent, 10);
        assert_eq!(report.failed, 2);
        assert_eq!(report.sent + report.failed, 12);
        assert_eq!(sender.attempted_ids().len(), 12);
        let failed: Vec<&str> = report.failures.iter().map(|f| f.recipient_id.as_str()).collect();
        assert_eq!(failed, vec!["m1", "m7"]);
        assert_eq!(report.failures[0].recipient, "Person1 Test");
        assert!(report.failures[0].error.contains("mailbox unavailable"));
        assert!(!report.is_complete_success());

        let last = rx.borrow().clone();
        assert!(last.finished);
        assert_eq!(last.current, None);
        assert_eq!((last.sent, last.failed, last.total), (10, 2, 12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_identifiers_are_skipped_not_failed() {
        let mut list = recipients(5);
        list[0].email = None;
        list[3].email = Some("   ".to_string());
        let sender = MockSender::new(Channel::Email, &[]);
        let (tx, _rx) = watch::channel(BroadcastProgress::default());
        let report = Broadcast::new(list, message(), BroadcastOptions::default())
            .unwrap()
            .run(&sender, &tx)
            .await;

        assert_eq!(report.total, 3);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(sender.attempted_ids(), vec!["m1", "m2", "m4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_recipient_list_finishes_immediately() {
        let sender = MockSender::new(Channel::DirectMessage, &[]);
        let (tx, rx) = watch::channel(BroadcastProgress::default());
        let start = Instant::now();
        let report = Broadcast::new(Vec::new(), message(), BroadcastOptions::default())
            .unwrap()
            .run(&sender, &tx)
            .await;
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(rx.borrow().finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_sends_duplicates() {
        let sender = MockSender::new(Channel::Email, &[]);
        let (tx, _rx) = watch::channel(BroadcastProgress::default());
        let broadcast = Broadcast::new(recipients(3), message(), BroadcastOptions::default()).unwrap();
        broadcast.clone().run(&sender, &tx).await;
        broadcast.run(&sender, &tx).await;
        assert_eq!(sender.attempted_ids(), vec!["m0", "m1", "m2", "m0", "m1", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_broadcast_reports_progress() {
        let sender = Arc::new(MockSender::new(Channel::Email, &["m4"]));
        let options = BroadcastOptions { batch_size: 2, batch_delay: Duration::from_millis(100) };
        let handle = Broadcast::new(recipients(5), message(), options).unwrap().spawn(Arc::clone(&sender));

        let mut rx = handle.subscribe();
        let mut saw_waiting = false;
        let mut saw_current = false;
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            saw_waiting |= snapshot.waiting;
            saw_current |= snapshot.current.is_some();
            assert!(snapshot.processed() <= snapshot.total);
            if snapshot.finished {
                break;
            }
        }
        assert!(saw_waiting);
        assert!(saw_current);
        assert!(handle.snapshot().finished);

        let report = handle.wait().await.unwrap();
        assert_eq!((report.sent, report.failed), (4, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_watcher_does_not_stop_dispatch() {
        let sender = Arc::new(MockSender::new(Channel::Email, &[]));
        let handle = Broadcast::new(recipients(15), message(), BroadcastOptions::default())
            .unwrap()
            .spawn(Arc::clone(&sender));
        drop(handle.subscribe());
        let report = handle.wait().await.unwrap();
        assert_eq!(report.sent, 15);
        assert_eq!(sender.attempted_ids().len(), 15);
    }
}
