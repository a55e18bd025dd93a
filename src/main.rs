//! Proximity - exposure classification and health analytics for contact tracing.
//!
//! # API Endpoints
//!
//! - `POST /encounters` - Record an encounter between two devices
//! - `GET /exposure/:user_id/:date` - A user's contact record for one day
//! - `GET /analytics/summary` - Daily health survey figures for a date range
//! - `GET /health` - Health check
//!
//! Configuration is read from `PROXIMITY_*` environment variables; see
//! [`proximity::config`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use proximity::aggregation::HealthAnalytics;
use proximity::api::{AppState, router};
use proximity::config::Config;
use proximity::delivery::PushClient;
use proximity::dispatch::NotificationDispatcher;
use proximity::ledger::ContactLedger;
use proximity::notifier::{Evaluator, ExposureNotifier};
use proximity::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("proximity=info".parse()?))
        .init();

    let config = Config::from_env();

    info!(port = config.port, db_url = %config.database_url, "Starting Proximity server");

    if !config.push.is_configured() {
        warn!("Push credentials not configured; exposure notifications will be rejected");
    }

    // Initialize storage
    let storage = Arc::new(Storage::new(&config.database_url).await?);
    info!("Database initialized");

    let ledger = ContactLedger::new(Arc::clone(&storage));
    let dispatcher = NotificationDispatcher::new(Arc::new(PushClient::new(config.push.clone())));
    let (notifier, _worker) = ExposureNotifier::spawn(
        Evaluator::new(ledger.clone(), dispatcher),
        config.notify_sweep_interval,
    );

    // Create application state
    let state = AppState {
        ledger,
        analytics: HealthAnalytics::new(Arc::clone(&storage), storage)
            .with_max_days(config.analytics_max_days),
        notifier,
        analytics_timeout: config.analytics_timeout,
    };

    let app = router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Proximity is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
