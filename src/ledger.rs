//! Per-user, per-day contact records and their merge semantics.
//!
//! All mutations of one `(user_id, date)` record go through that record's
//! lock, held across the whole load, classify and store sequence. Records
//! for different keys are updated independently. A key's lock lives in the
//! table only while some task holds or waits for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::NaiveDate;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::classifier::{ContactTransition, classify};
use crate::collaborators::RecordStore;
use crate::error::{Error, Result};
use crate::model::{ContactDayRecord, Encounter, RecordKey};

/// Result of folding one encounter into a record.
#[derive(Debug, Clone)]
pub struct EncounterOutcome {
    pub transition: ContactTransition,
    pub record: ContactDayRecord,
}

type LockTable = Arc<StdMutex<HashMap<RecordKey, Arc<Mutex<()>>>>>;

/// Exclusive access to one record. Removes the key's table entry on drop
/// when no other task is waiting for it.
struct RecordGuard {
    locks: LockTable,
    key: RecordKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// Exposure records backed by a [`RecordStore`].
pub struct ContactLedger<R> {
    store: Arc<R>,
    locks: LockTable,
}

impl<R> Clone for ContactLedger<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<R: RecordStore> ContactLedger<R> {
    pub fn new(store: Arc<R>) -> Self {
        Self {
            store,
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    async fn lock(&self, key: &RecordKey) -> RecordGuard {
        let mut held = RecordGuard {
            locks: Arc::clone(&self.locks),
            key: key.clone(),
            guard: None,
        };
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    async fn load(&self, key: &RecordKey) -> Result<ContactDayRecord> {
        let record = self.store.get_record(key).await.map_err(Error::fetch)?;
        Ok(record.unwrap_or_else(|| ContactDayRecord::empty(key)))
    }

    async fn save(&self, record: &mut ContactDayRecord) -> Result<()> {
        record.version += 1;
        self.store.put_record(record).await.map_err(Error::fetch)
    }

    /// Fold an encounter into the owner's record for that day.
    ///
    /// The record is created on the first encounter of the day. Each call
    /// adds its duration exactly once; suppressing duplicate deliveries is
    /// the caller's concern.
    pub async fn record_encounter(&self, encounter: &Encounter) -> Result<EncounterOutcome> {
        if !encounter.duration_secs.is_finite() || encounter.duration_secs < 0.0 {
            return Err(Error::InvalidEncounter(format!(
                "duration must be a non-negative number of seconds, got {}",
                encounter.duration_secs
            )));
        }
        if encounter.device_id.is_empty() {
            return Err(Error::InvalidEncounter("device id is empty".to_string()));
        }

        let key = encounter.key();
        let _guard = self.lock(&key).await;

        let mut record = self.load(&key).await?;
        let classification = classify(
            &encounter.device_id,
            encounter.duration_secs,
            record.contact_device_info.get(&encounter.device_id),
            encounter.observed_at,
        );

        record.all_contacts.insert(encounter.device_id.clone());
        record
            .contact_device_info
            .insert(encounter.device_id.clone(), classification.info.clone());

        if classification.crossed_moderate() {
            record.total_count_two += 1;
        }

        match classification.transition {
            ContactTransition::BecameClose => {
                record.total_count_ten += 1;
                record.unresolved_close_contact_count += 1;
                record.unresolved_close_contact_duration += classification.info.duration_secs;
                record
                    .close_contact_device_info
                    .insert(encounter.device_id.clone(), classification.info.clone());
                info!(
                    user_id = %key.user_id,
                    date = %key.date,
                    duration_secs = classification.info.duration_secs,
                    unresolved = record.unresolved_close_contact_count,
                    "Close contact recorded"
                );
            }
            ContactTransition::StillClose => {
                record
                    .close_contact_device_info
                    .insert(encounter.device_id.clone(), classification.info.clone());
            }
            _ => {}
        }

        self.save(&mut record).await?;

        debug!(
            user_id = %key.user_id,
            date = %key.date,
            transition = ?classification.transition,
            version = record.version,
            "Encounter recorded"
        );

        Ok(EncounterOutcome {
            transition: classification.transition,
            record,
        })
    }

    /// Clear the unresolved close-contact counters of a record.
    ///
    /// Call only after a notification for the record was delivered.
    pub async fn mark_resolved(&self, user_id: &str, date: NaiveDate) -> Result<()> {
        let key = RecordKey::new(user_id, date);
        let _guard = self.lock(&key).await;

        let mut record = self.load(&key).await?;
        if record.unresolved_close_contact_count == 0 {
            return Ok(());
        }

        record.unresolved_close_contact_count = 0;
        record.unresolved_close_contact_duration = 0.0;
        self.save(&mut record).await
    }

    /// Resolve exactly the close contacts an evaluator observed.
    ///
    /// `observed` is the record as it was read before the notification was
    /// sent. Close contacts added since then stay unresolved. Returns `true`
    /// when nothing is left unresolved.
    pub async fn resolve_observed(&self, observed: &ContactDayRecord) -> Result<bool> {
        let key = observed.key();
        let _guard = self.lock(&key).await;

        let mut record = self.load(&key).await?;
        if record.version != observed.version {
            debug!(
                user_id = %key.user_id,
                date = %key.date,
                observed = observed.version,
                current = record.version,
                "Record changed during dispatch"
            );
        }

        record.unresolved_close_contact_count = record
            .unresolved_close_contact_count
            .saturating_sub(observed.unresolved_close_contact_count);
        record.unresolved_close_contact_duration = if record.unresolved_close_contact_count == 0 {
            0.0
        } else {
            (record.unresolved_close_contact_duration
                - observed.unresolved_close_contact_duration)
                .max(0.0)
        };

        self.save(&mut record).await?;
        Ok(record.unresolved_close_contact_count == 0)
    }

    /// Get a record. A day without encounters yields an empty record.
    pub async fn get(&self, user_id: &str, date: NaiveDate) -> Result<ContactDayRecord> {
        self.load(&RecordKey::new(user_id, date)).await
    }

    /// Keys of records with close contacts still awaiting notification.
    pub async fn unresolved_keys(&self) -> Result<Vec<RecordKey>> {
        self.store.unresolved_keys().await.map_err(Error::fetch)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::Storage;
    use chrono::Utc;

    pub(crate) fn june(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 6, d).unwrap()
    }

    pub(crate) fn encounter(user: &str, device: &str, secs: f64) -> Encounter {
        Encounter {
            user_id: user.to_string(),
            date: june(1),
            device_id: device.to_string(),
            duration_secs: secs,
            observed_at: Utc::now(),
        }
    }

    async fn setup_ledger() -> ContactLedger<Storage> {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        ContactLedger::new(Arc::new(storage))
    }

    #[tokio::test]
    async fn test_get_missing_day_is_empty() {
        let ledger = setup_ledger().await;

        let record = ledger.get("user-a", june(1)).await.unwrap();

        assert_eq!(record, ContactDayRecord::empty(&RecordKey::new("user-a", june(1))));
    }

    #[tokio::test]
    async fn test_same_device_merges() {
        let ledger = setup_ledger().await;

        ledger.record_encounter(&encounter("user-a", "dev-1", 60.0)).await.unwrap();
        ledger.record_encounter(&encounter("user-a", "dev-1", 40.0)).await.unwrap();
        ledger.record_encounter(&encounter("user-a", "dev-2", 10.0)).await.unwrap();

        let record = ledger.get("user-a", june(1)).await.unwrap();
        assert_eq!(record.distinct_devices(), 2);
        assert_eq!(record.contact_device_info["dev-1"].duration_secs, 100.0);
        assert_eq!(record.all_contacts.len(), 2);
        assert_eq!(record.version, 3);
    }

    #[tokio::test]
    async fn test_duration_fold_is_order_independent() {
        let durations = [30.0, 95.5, 200.0, 12.25, 400.0];

        let forward = setup_ledger().await;
        for d in durations {
            forward.record_encounter(&encounter("user-a", "dev-1", d)).await.unwrap();
        }
        let backward = setup_ledger().await;
        for d in durations.iter().rev() {
            backward.record_encounter(&encounter("user-a", "dev-1", *d)).await.unwrap();
        }

        let a = forward.get("user-a", june(1)).await.unwrap();
        let b = backward.get("user-a", june(1)).await.unwrap();
        let total: f64 = durations.iter().sum();

        assert_eq!(a.contact_device_info["dev-1"].duration_secs, total);
        assert_eq!(b.contact_device_info["dev-1"].duration_secs, total);
        assert_eq!(a.total_count_two, b.total_count_two);
        assert_eq!(a.total_count_ten, b.total_count_ten);
    }

    #[tokio::test]
    async fn test_threshold_counts() {
        let ledger = setup_ledger().await;

        let outcome = ledger.record_encounter(&encounter("user-a", "dev-1", 119.999)).await.unwrap();
        assert_eq!(outcome.transition, ContactTransition::BelowThreshold);
        assert_eq!(outcome.record.total_count_two, 0);

        let outcome = ledger.record_encounter(&encounter("user-a", "dev-2", 120.0)).await.unwrap();
        assert_eq!(outcome.transition, ContactTransition::BecameModerate);
        assert_eq!(outcome.record.total_count_two, 1);

        // Staying moderate does not count again
        let outcome = ledger.record_encounter(&encounter("user-a", "dev-2", 100.0)).await.unwrap();
        assert_eq!(outcome.transition, ContactTransition::StillModerate);
        assert_eq!(outcome.record.total_count_two, 1);

        let outcome = ledger.record_encounter(&encounter("user-a", "dev-2", 380.0)).await.unwrap();
        assert_eq!(outcome.transition, ContactTransition::BecameClose);
        assert_eq!(outcome.record.total_count_ten, 1);
        assert_eq!(outcome.record.unresolved_close_contact_count, 1);
        assert_eq!(outcome.record.unresolved_close_contact_duration, 600.0);
        assert_eq!(outcome.record.close_contact_device_info["dev-2"].duration_secs, 600.0);

        let outcome = ledger.record_encounter(&encounter("user-a", "dev-2", 60.0)).await.unwrap();
        assert_eq!(outcome.transition, ContactTransition::StillClose);
        assert_eq!(outcome.record.total_count_ten, 1);
        assert_eq!(outcome.record.unresolved_close_contact_count, 1);
        assert_eq!(outcome.record.close_contact_device_info["dev-2"].duration_secs, 660.0);
    }

    #[tokio::test]
    async fn test_invariants_hold_after_every_mutation() {
        let ledger = setup_ledger().await;
        let script = [
            ("dev-1", 700.0),
            ("dev-2", 90.0),
            ("dev-2", 40.0),
            ("dev-3", 5.0),
            ("dev-2", 500.0),
            ("dev-4", 600.0),
            ("dev-3", 0.0),
        ];

        for (device, secs) in script {
            let outcome = ledger.record_encounter(&encounter("user-a", device, secs)).await.unwrap();
            assert!(outcome.record.counts_consistent(), "after {device} +{secs}");
        }

        let record = ledger.get("user-a", june(1)).await.unwrap();
        assert_eq!(record.distinct_devices(), 4);
        assert_eq!(record.total_count_two, 3);
        assert_eq!(record.total_count_ten, 3);
    }

    #[tokio::test]
    async fn test_mark_resolved_then_new_close_contact() {
        let ledger = setup_ledger().await;

        ledger.record_encounter(&encounter("user-a", "dev-1", 650.0)).await.unwrap();
        ledger.mark_resolved("user-a", june(1)).await.unwrap();

        let record = ledger.get("user-a", june(1)).await.unwrap();
        assert_eq!(record.unresolved_close_contact_count, 0);
        assert_eq!(record.unresolved_close_contact_duration, 0.0);
        assert_eq!(record.total_count_ten, 1);

        ledger.record_encounter(&encounter("user-a", "dev-2", 610.0)).await.unwrap();
        let record = ledger.get("user-a", june(1)).await.unwrap();
        assert!(record.unresolved_close_contact_count >= 1);
    }

    #[tokio::test]
    async fn test_resolve_observed_keeps_later_growth() {
        let ledger = setup_ledger().await;

        ledger.record_encounter(&encounter("user-a", "dev-1", 650.0)).await.unwrap();
        let observed = ledger.get("user-a", june(1)).await.unwrap();

        // A second close contact lands while the notification is in flight
        ledger.record_encounter(&encounter("user-a", "dev-2", 700.0)).await.unwrap();

        let cleared = ledger.resolve_observed(&observed).await.unwrap();
        assert!(!cleared);

        let record = ledger.get("user-a", june(1)).await.unwrap();
        assert_eq!(record.unresolved_close_contact_count, 1);
        assert_eq!(record.unresolved_close_contact_duration, 700.0);
        assert_eq!(ledger.unresolved_keys().await.unwrap().len(), 1);

        let cleared = ledger.resolve_observed(&record).await.unwrap();
        assert!(cleared);
        assert!(ledger.unresolved_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_negative_duration() {
        let ledger = setup_ledger().await;

        let result = ledger.record_encounter(&encounter("user-a", "dev-1", -1.0)).await;
        assert!(matches!(result, Err(Error::InvalidEncounter(_))));

        let result = ledger.record_encounter(&encounter("user-a", "dev-1", f64::NAN)).await;
        assert!(matches!(result, Err(Error::InvalidEncounter(_))));

        let record = ledger.get("user-a", june(1)).await.unwrap();
        assert_eq!(record.version, 0);
    }

    #[tokio::test]
    async fn test_concurrent_encounters_same_record() {
        let ledger = setup_ledger().await;

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let ledger = ledger.clone();
            tasks.spawn(async move {
                let device = if i % 2 == 0 { "dev-even" } else { "dev-odd" };
                ledger.record_encounter(&encounter("user-a", device, 40.0)).await.unwrap();
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let record = ledger.get("user-a", june(1)).await.unwrap();
        assert_eq!(record.contact_device_info["dev-even"].duration_secs, 400.0);
        assert_eq!(record.contact_device_info["dev-odd"].duration_secs, 400.0);
        assert_eq!(record.total_count_two, 2);
        assert_eq!(record.total_count_ten, 0);
        assert_eq!(record.version, 20);
        assert_eq!(ledger.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_lock_table_drains_after_use() {
        let ledger = setup_ledger().await;

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..200 {
            let ledger = ledger.clone();
            tasks.spawn(async move {
                let user = format!("user-{}", i % 50);
                ledger.record_encounter(&encounter(&user, "dev-1", 700.0)).await.unwrap();
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }
        assert_eq!(ledger.tracked_locks(), 0);

        let record = ledger.get("user-7", june(1)).await.unwrap();
        ledger.resolve_observed(&record).await.unwrap();
        ledger.mark_resolved("user-8", june(1)).await.unwrap();
        assert_eq!(ledger.tracked_locks(), 0);
    }
}
