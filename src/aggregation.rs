//! Aggregation of daily health surveys into a date-ranged report.
//!
//! # Consistency
//!
//! The registered-user total is read once per report and shared by every
//! day in it, so it is accurate as of aggregation time rather than
//! historically. A failure on any single day fails the whole report; a
//! partial report would silently under-count public-health data.
//!
//! Ranges longer than the configured maximum are rejected before anything
//! is fetched, and at most [`MAX_IN_FLIGHT_DAYS`] days are fetched at once.

use std::collections::BTreeMap;
use std::future::{Future, pending};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::collaborators::{RecordStore, SurveySource};
use crate::error::{Error, Result};
use crate::model::{HealthAnalyticsInfo, HealthAnalyticsResponse, UnhealthySubmission};

/// Longest range a summary covers unless configured otherwise.
pub const DEFAULT_MAX_RANGE_DAYS: u32 = 366;

/// Per-date fetches running concurrently for one summary.
pub const MAX_IN_FLIGHT_DAYS: usize = 16;

/// Every calendar date from `start` to `end`, inclusive and ascending.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
    if end < start {
        return Err(Error::InvalidRange { start, end });
    }
    Ok(start.iter_days().take_while(|d| *d <= end).collect())
}

/// Count (submission, symptom) occurrences.
///
/// A symptom listed twice in one submission counts twice.
pub fn symptom_frequency(submissions: Option<&[UnhealthySubmission]>) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for submission in submissions.unwrap_or_default() {
        for symptom in &submission.symptoms {
            *counts.entry(symptom.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// Raw survey figures for one day.
struct DaySurvey {
    healthy: u64,
    total_filled: u64,
    unhealthy: Option<Vec<UnhealthySubmission>>,
}

impl DaySurvey {
    fn into_info(self, total_users: u64) -> HealthAnalyticsInfo {
        let Some(unhealthy) = self.unhealthy else {
            return HealthAnalyticsInfo {
                total_filled: self.total_filled,
                healthy: self.healthy,
                ..HealthAnalyticsInfo::zero(total_users)
            };
        };

        HealthAnalyticsInfo {
            total_filled: self.total_filled,
            healthy: self.healthy,
            unhealthy: unhealthy.len() as u64,
            total_users,
            symptom_counts: symptom_frequency(Some(unhealthy.as_slice())),
        }
    }
}

async fn fetch_day<S: SurveySource>(surveys: &S, date: NaiveDate) -> anyhow::Result<DaySurvey> {
    let (healthy, total_filled, unhealthy) = tokio::try_join!(
        surveys.get_healthy_count(date),
        surveys.get_total_filled(date),
        surveys.get_unhealthy_submissions(date),
    )?;

    Ok(DaySurvey {
        healthy,
        total_filled,
        unhealthy,
    })
}

/// Builds [`HealthAnalyticsResponse`] reports from survey and user data.
pub struct HealthAnalytics<P, S> {
    records: Arc<P>,
    surveys: Arc<S>,
    max_days: u32,
}

impl<P, S> Clone for HealthAnalytics<P, S> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            surveys: Arc::clone(&self.surveys),
            max_days: self.max_days,
        }
    }
}

impl<P: RecordStore, S: SurveySource> HealthAnalytics<P, S> {
    pub fn new(records: Arc<P>, surveys: Arc<S>) -> Self {
        Self {
            records,
            surveys,
            max_days: DEFAULT_MAX_RANGE_DAYS,
        }
    }

    /// Set the longest range a summary may cover.
    pub fn with_max_days(mut self, max_days: u32) -> Self {
        self.max_days = max_days;
        self
    }

    /// Summarize every day from `start` to `end` inclusive.
    pub async fn get_summary(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HealthAnalyticsResponse> {
        self.get_summary_until(start, end, pending()).await
    }

    /// Like [`get_summary`](Self::get_summary), giving up after `timeout`.
    pub async fn get_summary_within(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        timeout: Duration,
    ) -> Result<HealthAnalyticsResponse> {
        self.get_summary_until(start, end, tokio::time::sleep(timeout))
            .await
    }

    /// Like [`get_summary`](Self::get_summary), aborting all in-flight
    /// fetches with [`Error::Cancelled`] once `cancel` completes.
    pub async fn get_summary_until<F>(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: F,
    ) -> Result<HealthAnalyticsResponse>
    where
        F: Future<Output = ()>,
    {
        if end < start {
            return Err(Error::InvalidRange { start, end });
        }
        if (end - start).num_days() >= i64::from(self.max_days) {
            return Err(Error::RangeTooLong {
                start,
                end,
                max_days: self.max_days,
            });
        }
        let dates = date_range(start, end)?;

        tokio::select! {
            result = self.collect(dates) => result,
            () = cancel => {
                warn!(%start, %end, "Health summary cancelled");
                Err(Error::Cancelled)
            }
        }
    }

    async fn collect(&self, dates: Vec<NaiveDate>) -> Result<HealthAnalyticsResponse> {
        let (Some(&start), Some(&end)) = (dates.first(), dates.last()) else {
            return Ok(HealthAnalyticsResponse::default());
        };

        let total_users = self.records.get_user_count().await.map_err(Error::fetch)?;

        let spawn = |tasks: &mut JoinSet<(NaiveDate, anyhow::Result<DaySurvey>)>, date: NaiveDate| {
            let surveys = Arc::clone(&self.surveys);
            tasks.spawn(async move { (date, fetch_day(surveys.as_ref(), date).await) });
        };

        // Dropping the set aborts whatever is still running
        let mut tasks = JoinSet::new();
        let mut pending_dates = dates.iter().copied();
        for date in pending_dates.by_ref().take(MAX_IN_FLIGHT_DAYS) {
            spawn(&mut tasks, date);
        }

        let mut days = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (date, fetched) = joined.map_err(|e| Error::fetch(e.into()))?;
            let survey = fetched.map_err(|e| {
                warn!(%date, error = %e, "Failed to fetch survey data");
                Error::fetch(e.context(format!("survey data for {date}")))
            })?;
            days.insert(date, survey.into_info(total_users));

            if let Some(next) = pending_dates.next() {
                spawn(&mut tasks, next);
            }
        }

        info!(
            %start,
            %end,
            days = days.len(),
            total_users,
            "Health summary computed"
        );

        Ok(HealthAnalyticsResponse { days })
    }
}
