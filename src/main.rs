use anyhow::Result;
use livedash::config::resolve_config;
use livedash::Dashboard;
use std::time::Duration;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livedash=info".into()),
        )
        .init();

    info!("Livedash starting...");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LIVEDASH_CONFIG").ok());
    let config = resolve_config(config_path.as_deref())?;
    info!(
        ws_url = %config.transport.url,
        api_url = %config.api.base_url,
        "Configuration loaded"
    );

    let dashboard = Dashboard::new(config)?;
    dashboard.start()?;

    // Log connection status transitions
    let mut status = WatchStream::new(dashboard.connection_status());
    let status_task = tokio::spawn(async move {
        while let Some(state) = status.next().await {
            info!(state = ?state, "Connection status");
        }
    });

    let _device_feed = dashboard.mount_device_feed();
    if let Err(e) = dashboard.refresh_devices().await {
        warn!(error = %e, "Continuing without initial device list");
    }

    let logs = dashboard.open_log_stream();
    let log_range = dashboard.config().api.log_history_range.clone();
    if let Err(e) = logs.load_history(dashboard.api(), &log_range).await {
        warn!(error = %e, "Continuing without log history");
    }

    let mut summary = tokio::time::interval(Duration::from_secs(30));
    summary.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = summary.tick() => {
                info!(
                    devices = dashboard.store().len(),
                    log_lines = logs.len(),
                    connected = dashboard.is_connected(),
                    "Dashboard summary"
                );
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
        }
    }

    logs.close();
    dashboard.shutdown().await;
    status_task.abort();

    info!("Livedash stopped");
    Ok(())
}
