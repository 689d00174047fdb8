use crate::api::{ApiClient, ApiError, Notices};
use crate::logs::{LogFilter, LogIdSequence, LogRecord, LogRingBuffer};
use crate::transport::{ConnectionManager, Subscription, LOGS_TOPIC};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Log view configuration
#[derive(Clone, Debug, Deserialize)]
pub struct LogsConfig {
    /// Visible records kept per log view
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Render tick the pending batch is flushed on
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

fn default_capacity() -> usize {
    1000
}

fn default_frame_interval_ms() -> u64 {
    16
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

/// A live log view: `/topic/logs` feeding a ring buffer flushed once per
/// frame tick.
///
/// Closing or dropping the stream unsubscribes and stops the tick.
pub struct LogStream {
    buffer: Arc<Mutex<LogRingBuffer>>,
    subscription: Subscription,
    notices: Notices,
    alive: CancellationToken,
    revision: Arc<watch::Sender<u64>>,
}

impl LogStream {
    pub fn open(
        manager: &Arc<ConnectionManager>,
        ids: LogIdSequence,
        notices: Notices,
        config: &LogsConfig,
    ) -> Self {
        let buffer = Arc::new(Mutex::new(LogRingBuffer::new(config.capacity, ids)));
        let (revision, _) = watch::channel(0u64);
        let revision = Arc::new(revision);
        let alive = CancellationToken::new();

        let sink = Arc::clone(&buffer);
        let subscription = manager.subscribe(LOGS_TOPIC, move |message| {
            sink.lock().unwrap().ingest(&message.body);
        });

        tokio::spawn(run_frame_loop(
            Arc::clone(&buffer),
            Arc::clone(&revision),
            Duration::from_millis(config.frame_interval_ms.max(1)),
            alive.clone(),
        ));

        info!(capacity = config.capacity, "Log stream opened");

        Self {
            buffer,
            subscription,
            notices,
            alive,
            revision,
        }
    }

    /// Backfill from `GET /api/logs/history`, replacing what is visible
    pub async fn load_history(&self, api: &ApiClient, range: &str) -> Result<usize, ApiError> {
        match api.fetch_log_history(range).await {
            Ok(entries) => {
                if self.alive.is_cancelled() {
                    debug!("Log stream closed, discarding history");
                    return Ok(0);
                }
                let loaded = self.buffer.lock().unwrap().load_history(entries);
                self.revision.send_modify(|r| *r += 1);
                info!(range = %range, loaded, "Log history loaded");
                Ok(loaded)
            }
            Err(e) => {
                warn!(range = %range, error = %e, "Log history fetch failed");
                if !self.alive.is_cancelled() {
                    self.notices.error(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Visible records, oldest first
    pub fn records(&self) -> Arc<Vec<LogRecord>> {
        self.buffer.lock().unwrap().records()
    }

    pub fn filtered(&self, filter: &LogFilter) -> Vec<LogRecord> {
        filter.apply(&self.records())
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bumped after every flush that moved records
    pub fn watch_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn close(&self) {
        if self.alive.is_cancelled() {
            return;
        }
        self.alive.cancel();
        self.subscription.unsubscribe();
        info!("Log stream closed");
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_frame_loop(
    buffer: Arc<Mutex<LogRingBuffer>>,
    revision: Arc<watch::Sender<u64>>,
    frame: Duration,
    alive: CancellationToken,
) {
    let mut ticker = interval(frame);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = alive.cancelled() => break,
            _ = ticker.tick() => {
                let moved = buffer.lock().unwrap().flush();
                if moved > 0 {
                    revision.send_modify(|r| *r += 1);
                }
            }
        }
    }
}
