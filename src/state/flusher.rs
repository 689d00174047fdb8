use crate::state::DeviceStore;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Device store configuration
#[derive(Clone, Debug, Deserialize)]
pub struct StoreConfig {
    /// Cadence of coalesced commits
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_flush_interval_ms() -> u64 {
    100
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl StoreConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

/// Commit pending device updates every `period` until cancelled.
///
/// Bounds snapshot churn to one commit per tick regardless of the inbound
/// update rate.
pub async fn run_flush_loop(store: Arc<DeviceStore>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval(period);

    // Skip missed ticks to prevent backlog under load
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(period_ms = period.as_millis() as u64, "Device flush loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if store.commit() {
                    debug!(version = store.version(), devices = store.len(), "Device snapshot committed");
                }
            }
        }
    }

    // Whatever arrived before shutdown still lands
    store.commit();
    info!("Device flush loop stopped");
}
