//! HTTP API handlers for Proximity.
//!
//! - **POST /encounters**: folds an encounter into the owner's daily record
//!   and queues an exposure notification when it creates a close contact.
//! - **GET /exposure/:user_id/:date**: the owner's record for that day.
//! - **GET /analytics/summary**: daily health survey figures for a range.
//!
//! Logs carry user ids and dates only. Device identifiers seen in
//! encounters are never logged.

use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{NaiveDate, Utc};
use tracing::{info, instrument, warn};

use crate::aggregation::HealthAnalytics;
use crate::classifier::ContactTransition;
use crate::error::Error;
use crate::ledger::ContactLedger;
use crate::model::{
    ContactDayRecord, EncounterRequest, EncounterResponse, HealthAnalyticsResponse, SummaryQuery,
};
use crate::notifier::ExposureNotifier;
use crate::storage::Storage;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub ledger: ContactLedger<Storage>,
    pub analytics: HealthAnalytics<Storage, Storage>,
    pub notifier: ExposureNotifier,
    pub analytics_timeout: Duration,
}

/// Build the router for all endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/encounters", post(post_encounter))
        .route("/exposure/:user_id/:date", get(get_exposure))
        .route("/analytics/summary", get(get_summary))
        .route("/health", get(health_check))
        .with_state(state)
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::InvalidRange { .. }
        | Error::RangeTooLong { .. }
        | Error::InvalidEncounter(_)
        | Error::NoRecipients => StatusCode::BAD_REQUEST,
        Error::Cancelled => StatusCode::GATEWAY_TIMEOUT,
        Error::CollaboratorFetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /encounters - Record an encounter.
///
/// # Request Body
///
/// ```json
/// {
///     "user_id": "8c1f...",
///     "device_id": "a41e...",
///     "duration_secs": 180,
///     "date": "2020-06-01"
/// }
/// ```
///
/// `date` and `observed_at` are optional and default to the server clock.
#[instrument(skip(state, request))]
pub async fn post_encounter(
    State(state): State<AppState>,
    Json(request): Json<EncounterRequest>,
) -> Result<Json<EncounterResponse>, StatusCode> {
    let encounter = request.into_encounter(Utc::now());

    match state.ledger.record_encounter(&encounter).await {
        Ok(outcome) => {
            if outcome.transition == ContactTransition::BecameClose {
                state.notifier.enqueue(encounter.key());
            }

            let record = &outcome.record;
            info!(
                user_id = %encounter.user_id,
                date = %encounter.date,
                transition = ?outcome.transition,
                "Encounter recorded"
            );

            Ok(Json(EncounterResponse {
                user_id: encounter.user_id.clone(),
                date: encounter.date,
                device_id: encounter.device_id.clone(),
                transition: outcome.transition,
                cumulative_secs: record.contact_device_info[&encounter.device_id].duration_secs,
                total_count_two: record.total_count_two,
                total_count_ten: record.total_count_ten,
                unresolved_close_contact_count: record.unresolved_close_contact_count,
            }))
        }
        Err(e) => {
            warn!(
                user_id = %encounter.user_id,
                error = %e,
                "Failed to record encounter"
            );
            Err(status_for(&e))
        }
    }
}

/// GET /exposure/:user_id/:date - A user's contact record for one day.
///
/// A day without encounters returns an empty record, not 404.
#[instrument(skip(state))]
pub async fn get_exposure(
    State(state): State<AppState>,
    Path((user_id, date)): Path<(String, NaiveDate)>,
) -> Result<Json<ContactDayRecord>, StatusCode> {
    match state.ledger.get(&user_id, date).await {
        Ok(record) => Ok(Json(record)),
        Err(e) => {
            warn!(user_id = %user_id, %date, error = %e, "Failed to load exposure record");
            Err(status_for(&e))
        }
    }
}

/// GET /analytics/summary - Daily health figures for a date range.
///
/// # Query Parameters
///
/// - `start` (required): first day, `YYYY-MM-DD`
/// - `end` (required): last day, inclusive
///
/// # Response
///
/// ```json
/// {
///     "days": {
///         "2020-06-01": {
///             "total_filled": 10,
///             "healthy": 7,
///             "unhealthy": 2,
///             "total_users": 250,
///             "symptom_counts": { "cough": 1, "fever": 2 }
///         }
///     }
/// }
/// ```
///
/// Returns 400 when `end` is before `start` or the range is longer than the
/// configured maximum, and 504 when the summary takes
/// longer than the configured timeout.
#[instrument(skip(state))]
pub async fn get_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<HealthAnalyticsResponse>, StatusCode> {
    match state
        .analytics
        .get_summary_within(query.start, query.end, state.analytics_timeout)
        .await
    {
        Ok(response) => {
            info!(
                start = %query.start,
                end = %query.end,
                days = response.days.len(),
                "Health summary queried"
            );
            Ok(Json(response))
        }
        Err(e) => {
            warn!(
                start = %query.start,
                end = %query.end,
                error = %e,
                "Failed to compute health summary"
            );
            Err(status_for(&e))
        }
    }
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
