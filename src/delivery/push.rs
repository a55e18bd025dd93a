//! IBM Cloud Push Notifications client.
//!
//! Sends one message to a list of device ids through the provider's REST
//! API. Host, application id and secret are injected through [`PushConfig`].
//!
//! # API Reference
//!
//! See: <https://cloud.ibm.com/apidocs/push-notifications>

use serde::Serialize;

use crate::collaborators::{PushDelivery, PushPayload, PushResponse};

/// Default provider host (US South region).
pub const DEFAULT_PUSH_HOST: &str = "https://imfpush.ng.bluemix.net";

/// Credentials and endpoint for the push provider.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Provider host, without a trailing path.
    pub base_url: String,

    /// Push service application id.
    pub app_id: String,

    /// Push service application secret, sent as the `appSecret` header.
    pub app_secret: String,
}

impl PushConfig {
    /// Whether credentials are present.
    pub fn is_configured(&self) -> bool {
        !self.app_id.is_empty() && !self.app_secret.is_empty()
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/imfpush/v1/apps/{}/messages",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.app_id)
        )
    }
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    message: Message<'a>,
    settings: Settings<'a>,
    target: Target<'a>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    alert: &'a str,
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct Settings<'a> {
    apns: Apns<'a>,
    gcm: Gcm<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Apns<'a> {
    title: &'a str,
    subtitle: &'a str,
    attachment_url: &'a str,
}

#[derive(Debug, Serialize)]
struct Gcm<'a> {
    priority: &'static str,
    style: GcmStyle<'a>,
}

#[derive(Debug, Serialize)]
struct GcmStyle<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    title: &'a str,
    text: &'a str,
    url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Target<'a> {
    device_ids: &'a [String],
}

impl<'a> MessageRequest<'a> {
    fn new(device_ids: &'a [String], payload: &'a PushPayload) -> Self {
        Self {
            message: Message {
                alert: payload.body,
                url: payload.url,
            },
            settings: Settings {
                apns: Apns {
                    title: payload.title,
                    subtitle: payload.subtitle,
                    attachment_url: payload.url,
                },
                gcm: Gcm {
                    priority: "max",
                    style: GcmStyle {
                        kind: "bigtext_notification",
                        title: payload.title,
                        text: payload.big_text,
                        url: payload.url,
                    },
                },
            },
            target: Target { device_ids },
        }
    }
}

/// Client for the push provider's message endpoint.
#[derive(Clone)]
pub struct PushClient {
    client: reqwest::Client,
    config: PushConfig,
}

impl PushClient {
    /// Create a new push client.
    pub fn new(config: PushConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

impl PushDelivery for PushClient {
    /// Post one message to the provider.
    ///
    /// Any HTTP answer, including error statuses, is returned as-is. Only a
    /// failure to get an answer at all is an `Err`.
    async fn send(
        &self,
        device_ids: &[String],
        payload: &PushPayload,
    ) -> anyhow::Result<PushResponse> {
        let body = MessageRequest::new(device_ids, payload);

        let response = self
            .client
            .post(self.config.messages_url())
            .header("appSecret", &self.config.app_secret)
            .json(&body)
            .send()
            .await?;

        let status_code = response.status().as_u16();
        let response_body = response.text().await?;

        Ok(PushResponse {
            status_code,
            response_body,
        })
    }
}
