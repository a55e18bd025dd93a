//! Interfaces to the systems this engine reads from and writes to.
//!
//! The engine owns the exposure and aggregation semantics; persistence,
//! survey data and push delivery belong to these collaborators. Their
//! failures are opaque to the engine and surface as
//! [`Error::CollaboratorFetch`](crate::Error::CollaboratorFetch).

use std::future::Future;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{ContactDayRecord, RecordKey, UnhealthySubmission};

/// Persistent storage of per-day contact records.
pub trait RecordStore: Send + Sync + 'static {
    /// Load a record, or `None` if the user had no encounters that day.
    fn get_record(
        &self,
        key: &RecordKey,
    ) -> impl Future<Output = anyhow::Result<Option<ContactDayRecord>>> + Send;

    /// Insert or replace a record.
    fn put_record(&self, record: &ContactDayRecord)
    -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Registered users system-wide.
    fn get_user_count(&self) -> impl Future<Output = anyhow::Result<u64>> + Send;

    /// Keys of records that still have unresolved close contacts.
    fn unresolved_keys(&self) -> impl Future<Output = anyhow::Result<Vec<RecordKey>>> + Send;
}

/// Per-day health survey data.
pub trait SurveySource: Send + Sync + 'static {
    fn get_healthy_count(&self, date: NaiveDate)
    -> impl Future<Output = anyhow::Result<u64>> + Send;

    fn get_total_filled(&self, date: NaiveDate) -> impl Future<Output = anyhow::Result<u64>> + Send;

    /// Unhealthy submissions for a day. `None` means no data, not an error.
    fn get_unhealthy_submissions(
        &self,
        date: NaiveDate,
    ) -> impl Future<Output = anyhow::Result<Option<Vec<UnhealthySubmission>>>> + Send;
}

/// Message content handed to the push provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PushPayload {
    pub title: &'static str,
    pub subtitle: &'static str,
    pub body: &'static str,
    /// Expanded text for platforms that show a big-text style.
    pub big_text: &'static str,
    pub url: &'static str,
}

/// What the push provider answered, verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub status_code: u16,
    pub response_body: String,
}

/// Push notification transport.
///
/// Called at most once per dispatch; retries are not this layer's concern.
pub trait PushDelivery: Send + Sync + 'static {
    fn send(
        &self,
        device_ids: &[String],
        payload: &PushPayload,
    ) -> impl Future<Output = anyhow::Result<PushResponse>> + Send;
}
