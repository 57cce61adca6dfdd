//! camhub - camera hub daemon
//!
//! Discovers cameras, replays persisted motion/recording tasks and keeps
//! the camera collection fresh until Ctrl-C.

use camhub::state::{AppConfig, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camhub=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camhub v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        data_dir = %config.data_dir.display(),
        record_dir = %config.record_dir.display(),
        custom_cameras = config.custom_cameras.len(),
        queue_max = config.queue_max,
        "Configuration loaded"
    );

    let state = AppState::build(config)?;
    state.restore().await;

    // Periodic collection refresh
    let refresh_hub = state.hub.clone();
    let refresh_interval = state.config.refresh_interval;
    let refresh = tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            let summary = refresh_hub.refresh_collection().await;
            if !summary.added.is_empty() || !summary.removed.is_empty() {
                tracing::info!(
                    added = ?summary.added,
                    removed = ?summary.removed,
                    "Camera collection changed"
                );
            }
        }
    });

    tracing::info!(
        refresh_interval_sec = refresh_interval.as_secs(),
        "camhub running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    refresh.abort();
    state.shutdown().await;

    Ok(())
}
