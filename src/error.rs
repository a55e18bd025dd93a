//! Error type shared by the exposure and analytics operations.
//!
//! Absent per-day data is never an error: an empty day is represented by a
//! zero-valued record or report entry.

use chrono::NaiveDate;

/// Result alias for the engine's operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the exposure and analytics operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested reporting range ends before it starts.
    #[error("invalid date range: end {end} is before start {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    /// The requested reporting range spans more days than allowed.
    #[error("date range {start}..={end} exceeds {max_days} days")]
    RangeTooLong {
        start: NaiveDate,
        end: NaiveDate,
        max_days: u32,
    },

    /// An encounter carried an unusable duration.
    #[error("invalid encounter: {0}")]
    InvalidEncounter(String),

    /// A notification was requested for an empty device list.
    #[error("notification dispatch requires at least one device id")]
    NoRecipients,

    /// The caller cancelled an in-flight aggregation, or its deadline passed.
    #[error("aggregation cancelled before completion")]
    Cancelled,

    /// A persistence, survey, or push collaborator failed.
    #[error("collaborator fetch failed: {0:#}")]
    CollaboratorFetch(anyhow::Error),
}

impl Error {
    pub(crate) fn fetch(err: anyhow::Error) -> Self {
        Error::CollaboratorFetch(err)
    }
}
