//! Background exposure notification.
//!
//! Ingestion only enqueues the key of a record that gained a close contact;
//! a single worker task evaluates it, dispatches the alert and resolves the
//! record. A record whose dispatch failed stays unresolved and is picked up
//! again by the periodic sweep.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::collaborators::{PushDelivery, RecordStore};
use crate::dispatch::NotificationDispatcher;
use crate::error::Result;
use crate::ledger::ContactLedger;
use crate::model::RecordKey;
use crate::tracker::should_notify;

/// What evaluating one record led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// No unresolved close contacts.
    NothingToNotify,
    /// The alert was accepted. `cleared` is false when close contacts
    /// arrived while it was in flight.
    Notified { cleared: bool },
    /// The provider did not accept the alert; the record stays unresolved.
    DispatchFailed { status_code: u16 },
}

/// Runs the notify decision for single records.
pub struct Evaluator<R, P> {
    ledger: ContactLedger<R>,
    dispatcher: NotificationDispatcher<P>,
}

impl<R: RecordStore, P: PushDelivery> Evaluator<R, P> {
    pub fn new(ledger: ContactLedger<R>, dispatcher: NotificationDispatcher<P>) -> Self {
        Self { ledger, dispatcher }
    }

    /// Notify the record's owner if it has unresolved close contacts.
    ///
    /// Resolution only covers what was read before dispatching, so close
    /// contacts recorded in the meantime are left for the next evaluation.
    pub async fn evaluate(&self, key: &RecordKey) -> Result<Evaluation> {
        let observed = self.ledger.get(&key.user_id, key.date).await?;
        if !should_notify(&observed) {
            return Ok(Evaluation::NothingToNotify);
        }

        let response = self
            .dispatcher
            .dispatch(std::slice::from_ref(&observed.user_id))
            .await?;

        if !response.is_success() {
            return Ok(Evaluation::DispatchFailed {
                status_code: response.status_code,
            });
        }

        let cleared = self.ledger.resolve_observed(&observed).await?;
        info!(
            user_id = %key.user_id,
            date = %key.date,
            close_contacts = observed.unresolved_close_contact_count,
            cleared,
            "Exposure notification delivered"
        );

        Ok(Evaluation::Notified { cleared })
    }

    /// Evaluate every record that still has unresolved close contacts.
    ///
    /// A record that fails to evaluate is logged and skipped; the rest of
    /// the sweep still runs. Returns how many records were notified.
    pub async fn sweep(&self) -> Result<usize> {
        let keys = self.ledger.unresolved_keys().await?;
        let mut notified = 0;
        for key in &keys {
            match self.evaluate(key).await {
                Ok(Evaluation::Notified { .. }) => notified += 1,
                Ok(_) => {}
                Err(e) => warn!(
                    user_id = %key.user_id,
                    date = %key.date,
                    error = %e,
                    "Failed to evaluate record during sweep"
                ),
            }
        }
        Ok(notified)
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<RecordKey>, sweep_interval: Duration) {
        let mut sweep = tokio::time::interval(sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                key = rx.recv() => {
                    let Some(key) = key else { break };
                    match self.evaluate(&key).await {
                        Ok(Evaluation::DispatchFailed { status_code }) => warn!(
                            user_id = %key.user_id,
                            date = %key.date,
                            status_code,
                            "Exposure notification not delivered, will retry on sweep"
                        ),
                        Ok(evaluation) => debug!(user_id = %key.user_id, ?evaluation, "Record evaluated"),
                        Err(e) => warn!(user_id = %key.user_id, error = %e, "Failed to evaluate record"),
                    }
                }
                _ = sweep.tick() => {
                    match self.sweep().await {
                        Ok(0) => {}
                        Ok(notified) => info!(notified, "Unresolved exposure sweep finished"),
                        Err(e) => warn!(error = %e, "Unresolved exposure sweep failed"),
                    }
                }
            }
        }

        debug!("Exposure notifier stopped");
    }
}

/// Handle for queueing records for notification.
///
/// The worker stops once every handle is dropped.
#[derive(Clone)]
pub struct ExposureNotifier {
    tx: mpsc::UnboundedSender<RecordKey>,
}

impl ExposureNotifier {
    /// Start the notification worker.
    ///
    /// The first sweep runs immediately, so records left unresolved by a
    /// previous run are retried at startup.
    pub fn spawn<R: RecordStore, P: PushDelivery>(
        evaluator: Evaluator<R, P>,
        sweep_interval: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(evaluator.run(rx, sweep_interval));
        (Self { tx }, handle)
    }

    /// Queue a record for evaluation. Never blocks.
    pub fn enqueue(&self, key: RecordKey) {
        if self.tx.send(key).is_err() {
            warn!("Exposure notifier is not running");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::RecordingPush;
    use crate::ledger::tests::{encounter, june};
    use crate::model::ContactDayRecord;
    use crate::storage::Storage;
    use std::sync::Arc;

    /// Storage that cannot load one user's records.
    struct BrokenForUser {
        inner: Storage,
        user_id: &'static str,
    }

    impl RecordStore for BrokenForUser {
        async fn get_record(&self, key: &RecordKey) -> anyhow::Result<Option<ContactDayRecord>> {
            if key.user_id == self.user_id {
                anyhow::bail!("record unreadable");
            }
            self.inner.get_record(key).await
        }

        async fn put_record(&self, record: &ContactDayRecord) -> anyhow::Result<()> {
            self.inner.put_record(record).await
        }

        async fn get_user_count(&self) -> anyhow::Result<u64> {
            self.inner.get_user_count().await
        }

        async fn unresolved_keys(&self) -> anyhow::Result<Vec<RecordKey>> {
            self.inner.unresolved_keys().await
        }
    }

    async fn setup(push: RecordingPush) -> (Evaluator<Storage, RecordingPush>, Arc<RecordingPush>) {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let push = Arc::new(push);
        let evaluator = Evaluator::new(
            ContactLedger::new(Arc::new(storage)),
            NotificationDispatcher::new(Arc::clone(&push)),
        );
        (evaluator, push)
    }

    #[tokio::test]
    async fn test_no_dispatch_without_close_contacts() {
        let (evaluator, push) = setup(RecordingPush::answering(202)).await;
        evaluator.ledger.record_encounter(&encounter("user-a", "dev-1", 300.0)).await.unwrap();

        let evaluation = evaluator.evaluate(&RecordKey::new("user-a", june(1))).await.unwrap();

        assert_eq!(evaluation, Evaluation::NothingToNotify);
        assert_eq!(push.calls(), 0);
    }

    #[tokio::test]
    async fn test_delivered_notification_resolves_record() {
        let (evaluator, push) = setup(RecordingPush::answering(202)).await;
        evaluator.ledger.record_encounter(&encounter("user-a", "dev-1", 900.0)).await.unwrap();
        let key = RecordKey::new("user-a", june(1));

        let evaluation = evaluator.evaluate(&key).await.unwrap();

        assert_eq!(evaluation, Evaluation::Notified { cleared: true });
        assert_eq!(push.sent.lock().unwrap()[0], vec!["user-a".to_string()]);
        let record = evaluator.ledger.get("user-a", june(1)).await.unwrap();
        assert_eq!(record.unresolved_close_contact_count, 0);

        // Re-running after resolution sends nothing more
        let evaluation = evaluator.evaluate(&key).await.unwrap();
        assert_eq!(evaluation, Evaluation::NothingToNotify);
        assert_eq!(push.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_dispatch_stays_unresolved() {
        let (evaluator, push) = setup(RecordingPush::unreachable()).await;
        evaluator.ledger.record_encounter(&encounter("user-a", "dev-1", 900.0)).await.unwrap();
        let key = RecordKey::new("user-a", june(1));

        let evaluation = evaluator.evaluate(&key).await.unwrap();
        assert_eq!(evaluation, Evaluation::DispatchFailed { status_code: 0 });

        let record = evaluator.ledger.get("user-a", june(1)).await.unwrap();
        assert_eq!(record.unresolved_close_contact_count, 1);

        // The sweep retries it
        assert_eq!(evaluator.sweep().await.unwrap(), 0);
        assert_eq!(push.calls(), 2);
    }

    #[tokio::test]
    async fn test_sweep_notifies_every_unresolved_record() {
        let (evaluator, push) = setup(RecordingPush::answering(200)).await;
        for user in ["user-a", "user-b"] {
            evaluator.ledger.record_encounter(&encounter(user, "dev-1", 650.0)).await.unwrap();
        }
        evaluator.ledger.record_encounter(&encounter("user-c", "dev-1", 60.0)).await.unwrap();

        let notified = evaluator.sweep().await.unwrap();

        assert_eq!(notified, 2);
        assert_eq!(push.calls(), 2);
        assert!(evaluator.ledger.unresolved_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_skips_unreadable_record() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let seed = ContactLedger::new(Arc::new(storage.clone()));
        for user in ["user-a", "user-b", "user-c"] {
            seed.record_encounter(&encounter(user, "dev-1", 650.0)).await.unwrap();
        }

        let push = Arc::new(RecordingPush::answering(202));
        let evaluator = Evaluator::new(
            ContactLedger::new(Arc::new(BrokenForUser {
                inner: storage,
                user_id: "user-a",
            })),
            NotificationDispatcher::new(Arc::clone(&push)),
        );

        let notified = evaluator.sweep().await.unwrap();

        assert_eq!(notified, 2);
        assert_eq!(
            push.sent.lock().unwrap().as_slice(),
            &[vec!["user-b".to_string()], vec!["user-c".to_string()]]
        );
        let remaining = seed.unresolved_keys().await.unwrap();
        assert_eq!(remaining, vec![RecordKey::new("user-a", june(1))]);
    }

    #[tokio::test]
    async fn test_worker_processes_queue() {
        let (evaluator, push) = setup(RecordingPush::answering(202)).await;
        let ledger = evaluator.ledger.clone();
        let (notifier, handle) = ExposureNotifier::spawn(evaluator, Duration::from_secs(3600));

        ledger.record_encounter(&encounter("user-a", "dev-1", 700.0)).await.unwrap();
        notifier.enqueue(RecordKey::new("user-a", june(1)));

        let mut resolved = false;
        for _ in 0..100 {
            let record = ledger.get("user-a", june(1)).await.unwrap();
            if record.unresolved_close_contact_count == 0 {
                resolved = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(resolved);
        assert_eq!(push.calls(), 1);

        drop(notifier);
        handle.await.unwrap();
    }
}
