//! Exposure alert dispatch.
//!
//! Hands the fixed exposure alert to a [`PushDelivery`] collaborator and
//! reports what it answered. A failed notification must never break the
//! exposure pipeline: transport failures come back as an outcome with
//! [`TRANSPORT_FAILURE_STATUS`], not as an error.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::collaborators::{PushDelivery, PushPayload, PushResponse};
use crate::error::{Error, Result};

const GUIDANCE_URL: &str = "https://www.cdc.gov/coronavirus/2019-nCoV/index.html";

/// The alert every exposed user receives.
pub const EXPOSURE_ALERT: PushPayload = PushPayload {
    title: "Important Notification",
    subtitle: "You have been exposed.",
    body: "You may have been exposed to COVID-19 virus. Please follow these instructions as per https://www.cdc.gov/coronavirus/2019-nCoV/index.html",
    big_text: "You have been identified as close contact with a COVID-19 patient. Please follow these instructions as per https://www.cdc.gov/coronavirus/2019-nCoV/index.html",
    url: GUIDANCE_URL,
};

/// Status reported when the provider could not be reached at all.
pub const TRANSPORT_FAILURE_STATUS: u16 = 0;

impl PushResponse {
    /// Whether the provider accepted the message.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Sends exposure alerts through a push provider.
pub struct NotificationDispatcher<P> {
    push: Arc<P>,
}

impl<P> Clone for NotificationDispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            push: Arc::clone(&self.push),
        }
    }
}

impl<P: PushDelivery> NotificationDispatcher<P> {
    pub fn new(push: Arc<P>) -> Self {
        Self { push }
    }

    /// Send [`EXPOSURE_ALERT`] to `device_ids`.
    pub async fn dispatch(&self, device_ids: &[String]) -> Result<PushResponse> {
        self.dispatch_with(device_ids, &EXPOSURE_ALERT).await
    }

    /// Send `payload` to `device_ids` with a single provider call.
    ///
    /// An empty device list is rejected with [`Error::NoRecipients`] before
    /// the provider is contacted. Every other failure is reported through
    /// the returned status.
    pub async fn dispatch_with(
        &self,
        device_ids: &[String],
        payload: &PushPayload,
    ) -> Result<PushResponse> {
        if device_ids.is_empty() {
            return Err(Error::NoRecipients);
        }

        match self.push.send(device_ids, payload).await {
            Ok(response) if response.is_success() => {
                debug!(
                    devices = device_ids.len(),
                    status_code = response.status_code,
                    "Push notification sent"
                );
                Ok(response)
            }
            Ok(response) => {
                warn!(
                    devices = device_ids.len(),
                    status_code = response.status_code,
                    response_body = %response.response_body,
                    "Push notification rejected"
                );
                Ok(response)
            }
            Err(e) => {
                error!(
                    devices = device_ids.len(),
                    error = %e,
                    "Failed to send push notification"
                );
                Ok(PushResponse {
                    status_code: TRANSPORT_FAILURE_STATUS,
                    response_body: e.to_string(),
                })
            }
        }
    }
}
