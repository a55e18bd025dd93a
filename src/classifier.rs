//! Duration-threshold classification of encounters.
//!
//! Severity is decided on the **cumulative** same-day duration with a
//! device, not on any single encounter. Two short encounters with the same
//! device add up exactly like one long one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::EncounterInfo;

/// Cumulative seconds at which a device counts as a contact.
pub const MODERATE_CONTACT_SECS: f64 = 120.0;

/// Cumulative seconds at which a device counts as a close contact.
pub const CLOSE_CONTACT_SECS: f64 = 600.0;

/// Exposure bucket for a cumulative daily duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Under two minutes.
    Casual,
    /// Two minutes or more, under ten.
    Moderate,
    /// Ten minutes or more.
    Close,
}

impl Severity {
    /// Bucket a cumulative duration. Reaching a threshold exactly counts.
    pub fn of(duration_secs: f64) -> Self {
        if duration_secs >= CLOSE_CONTACT_SECS {
            Severity::Close
        } else if duration_secs >= MODERATE_CONTACT_SECS {
            Severity::Moderate
        } else {
            Severity::Casual
        }
    }
}

/// How an encounter moved a device between severity buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactTransition {
    /// Still under the moderate threshold.
    BelowThreshold,
    /// Crossed the moderate threshold with this encounter.
    BecameModerate,
    /// Already moderate and still under the close threshold.
    StillModerate,
    /// Crossed the close threshold with this encounter.
    BecameClose,
    /// Was already a close contact before this encounter.
    StillClose,
}

impl ContactTransition {
    /// Derive the transition from the buckets before and after an encounter.
    pub fn between(before: Severity, after: Severity) -> Self {
        match (before, after) {
            (Severity::Close, _) => ContactTransition::StillClose,
            (_, Severity::Close) => ContactTransition::BecameClose,
            (Severity::Moderate, _) => ContactTransition::StillModerate,
            (Severity::Casual, Severity::Moderate) => ContactTransition::BecameModerate,
            (Severity::Casual, Severity::Casual) => ContactTransition::BelowThreshold,
        }
    }
}

/// Outcome of classifying one encounter.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// The device's updated cumulative exposure.
    pub info: EncounterInfo,
    pub before: Severity,
    pub after: Severity,
    pub transition: ContactTransition,
}

impl Classification {
    /// True when this encounter took the device to two minutes or more.
    ///
    /// This also holds for a single encounter that jumps straight from
    /// casual to close.
    pub fn crossed_moderate(&self) -> bool {
        self.before < Severity::Moderate && self.after >= Severity::Moderate
    }

    /// True when this encounter took the device to ten minutes or more.
    pub fn crossed_close(&self) -> bool {
        self.transition == ContactTransition::BecameClose
    }
}

/// Classify an encounter against the device's existing exposure for the day.
///
/// A missing `existing` entry is treated as a zero-duration baseline, and a
/// negative duration contributes nothing. This never fails.
pub fn classify(
    device_id: &str,
    duration_secs: f64,
    existing: Option<&EncounterInfo>,
    observed_at: DateTime<Utc>,
) -> Classification {
    let baseline = match existing {
        Some(info) => info.clone(),
        None => EncounterInfo::baseline(device_id, observed_at),
    };

    let before = Severity::of(baseline.duration_secs);
    let info = baseline.merged(duration_secs, observed_at);
    let after = Severity::of(info.duration_secs);

    Classification {
        info,
        before,
        after,
        transition: ContactTransition::between(before, after),
    }
}
