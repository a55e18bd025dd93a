//! Data models for Proximity.
//!
//! # Identity
//!
//! Every exposure record is keyed by a plain `(user_id, date)` pair. The
//! `user_id` is the identifier the push provider knows the user's device by,
//! so a record's owner can be notified without any further lookup.
//!
//! Device identifiers seen in encounters are the rotating identifiers other
//! phones broadcast. They are stored only inside the owner's per-day record.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::ContactTransition;

/// Identity of a per-day contact record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub user_id: String,
    pub date: NaiveDate,
}

impl RecordKey {
    pub fn new(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            date,
        }
    }
}

/// Accumulated exposure to one device over one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterInfo {
    /// The other device's broadcast identifier.
    pub device_id: String,

    /// Cumulative contact duration in seconds. Never decreases.
    pub duration_secs: f64,

    /// Earliest observation of this device today.
    pub first_seen: DateTime<Utc>,

    /// Latest observation of this device today.
    pub last_seen: DateTime<Utc>,
}

impl EncounterInfo {
    /// A zero-duration baseline for a device first observed at `at`.
    pub fn baseline(device_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.to_string(),
            duration_secs: 0.0,
            first_seen: at,
            last_seen: at,
        }
    }

    /// Fold another encounter into this one.
    ///
    /// Durations are summed and the seen window is widened, so the result
    /// does not depend on the order encounters arrive in.
    pub fn merged(&self, duration_secs: f64, at: DateTime<Utc>) -> Self {
        Self {
            device_id: self.device_id.clone(),
            duration_secs: self.duration_secs + duration_secs.max(0.0),
            first_seen: self.first_seen.min(at),
            last_seen: self.last_seen.max(at),
        }
    }
}

/// A single proximity observation reported by a user's device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encounter {
    pub user_id: String,
    pub date: NaiveDate,
    pub device_id: String,
    pub duration_secs: f64,
    pub observed_at: DateTime<Utc>,
}

impl Encounter {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.user_id.clone(), self.date)
    }
}

/// Everything one user was exposed to on one calendar day.
///
/// # Invariants
///
/// - `total_count_ten <= total_count_two <= contact_device_info.len()`
/// - every key in `close_contact_device_info` is also in
///   `contact_device_info` with at least the same cumulative duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactDayRecord {
    pub user_id: String,
    pub date: NaiveDate,

    /// Every device seen today. Informational only; counts come from
    /// `contact_device_info`.
    pub all_contacts: BTreeSet<String>,

    /// One entry per distinct device seen today.
    pub contact_device_info: BTreeMap<String, EncounterInfo>,

    /// Devices whose cumulative duration reached the close-contact threshold.
    pub close_contact_device_info: BTreeMap<String, EncounterInfo>,

    /// Distinct devices at or above two minutes.
    pub total_count_two: u32,

    /// Distinct devices at or above ten minutes.
    pub total_count_ten: u32,

    /// Close contacts not yet covered by a delivered notification.
    pub unresolved_close_contact_count: u32,

    /// Cumulative duration of the unresolved close contacts, in seconds.
    pub unresolved_close_contact_duration: f64,

    /// Bumped on every stored mutation.
    pub version: u64,
}

impl ContactDayRecord {
    /// The record for a day with no contacts.
    pub fn empty(key: &RecordKey) -> Self {
        Self {
            user_id: key.user_id.clone(),
            date: key.date,
            all_contacts: BTreeSet::new(),
            contact_device_info: BTreeMap::new(),
            close_contact_device_info: BTreeMap::new(),
            total_count_two: 0,
            total_count_ten: 0,
            unresolved_close_contact_count: 0,
            unresolved_close_contact_duration: 0.0,
            version: 0,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.user_id.clone(), self.date)
    }

    /// Number of distinct devices encountered today.
    pub fn distinct_devices(&self) -> usize {
        self.contact_device_info.len()
    }

    /// Whether the severity counts are consistent with the device maps.
    pub fn counts_consistent(&self) -> bool {
        self.total_count_ten <= self.total_count_two
            && (self.total_count_two as usize) <= self.distinct_devices()
            && self.close_contact_device_info.iter().all(|(id, close)| {
                self.contact_device_info
                    .get(id)
                    .is_some_and(|all| all.duration_secs >= close.duration_secs)
            })
    }
}

/// One unhealthy survey submission for a day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhealthySubmission {
    /// Reported symptoms. A symptom listed twice counts twice.
    pub symptoms: Vec<String>,
}

/// Population health figures for one day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthAnalyticsInfo {
    /// Survey submissions received that day.
    pub total_filled: u64,

    /// Submissions reporting healthy.
    pub healthy: u64,

    /// Submissions reporting at least one symptom.
    pub unhealthy: u64,

    /// Registered users system-wide, as of aggregation time.
    pub total_users: u64,

    /// Symptom label to (submission, symptom) occurrence count.
    pub symptom_counts: BTreeMap<String, u64>,
}

impl HealthAnalyticsInfo {
    /// A day with no survey data.
    pub fn zero(total_users: u64) -> Self {
        Self {
            total_users,
            ..Self::default()
        }
    }
}

/// Response for GET /analytics/summary.
///
/// One entry per day of the requested range in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthAnalyticsResponse {
    pub days: BTreeMap<NaiveDate, HealthAnalyticsInfo>,
}

/// Query parameters for GET /analytics/summary.
#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Request body for POST /encounters.
///
/// `observed_at` defaults to the server clock and `date` to the UTC day of
/// `observed_at`.
#[derive(Debug, Clone, Deserialize)]
pub struct EncounterRequest {
    pub user_id: String,
    pub device_id: String,
    pub duration_secs: f64,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl EncounterRequest {
    pub fn into_encounter(self, now: DateTime<Utc>) -> Encounter {
        let observed_at = self.observed_at.unwrap_or(now);
        Encounter {
            user_id: self.user_id,
            date: self.date.unwrap_or_else(|| observed_at.date_naive()),
            device_id: self.device_id,
            duration_secs: self.duration_secs,
            observed_at,
        }
    }
}

/// Response for POST /encounters.
#[derive(Debug, Clone, Serialize)]
pub struct EncounterResponse {
    pub user_id: String,
    pub date: NaiveDate,
    pub device_id: String,
    pub transition: ContactTransition,
    pub cumulative_secs: f64,
    pub total_count_two: u32,
    pub total_count_ten: u32,
    pub unresolved_close_contact_count: u32,
}
