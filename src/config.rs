//! Runtime configuration, read from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `PROXIMITY_PORT` | `3000` |
//! | `PROXIMITY_DATABASE_URL` | `sqlite:proximity.db?mode=rwc` |
//! | `PROXIMITY_PUSH_HOST` | [`DEFAULT_PUSH_HOST`] |
//! | `PROXIMITY_PUSH_APP_ID` | empty |
//! | `PROXIMITY_PUSH_APP_SECRET` | empty |
//! | `PROXIMITY_ANALYTICS_TIMEOUT_SECS` | `30` |
//! | `PROXIMITY_ANALYTICS_MAX_DAYS` | `366` |
//! | `PROXIMITY_NOTIFY_SWEEP_SECS` | `300` |

use std::env;
use std::time::Duration;

use crate::aggregation::DEFAULT_MAX_RANGE_DAYS;
use crate::delivery::PushConfig;
use crate::delivery::push::DEFAULT_PUSH_HOST;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:proximity.db?mode=rwc";

const DEFAULT_ANALYTICS_TIMEOUT_SECS: u64 = 30;
const DEFAULT_NOTIFY_SWEEP_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub push: PushConfig,

    /// Upper bound on a single health summary request.
    pub analytics_timeout: Duration,

    /// Longest date range a health summary may cover.
    pub analytics_max_days: u32,

    /// How often unresolved close contacts are re-evaluated.
    pub notify_sweep_interval: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |name: &str| lookup(name).and_then(|v| v.parse::<u64>().ok());

        Self {
            port: lookup("PROXIMITY_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            database_url: lookup("PROXIMITY_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            push: PushConfig {
                base_url: lookup("PROXIMITY_PUSH_HOST")
                    .unwrap_or_else(|| DEFAULT_PUSH_HOST.to_string()),
                app_id: lookup("PROXIMITY_PUSH_APP_ID").unwrap_or_default(),
                app_secret: lookup("PROXIMITY_PUSH_APP_SECRET").unwrap_or_default(),
            },
            analytics_timeout: Duration::from_secs(
                parsed("PROXIMITY_ANALYTICS_TIMEOUT_SECS")
                    .unwrap_or(DEFAULT_ANALYTICS_TIMEOUT_SECS),
            ),
            analytics_max_days: lookup("PROXIMITY_ANALYTICS_MAX_DAYS")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|days| *days > 0)
                .unwrap_or(DEFAULT_MAX_RANGE_DAYS),
            notify_sweep_interval: Duration::from_secs(
                parsed("PROXIMITY_NOTIFY_SWEEP_SECS")
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_NOTIFY_SWEEP_SECS),
            ),
        }
    }
}
