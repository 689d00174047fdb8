use crate::api::{ApiClient, ApiError, Notices};
use crate::series::{HistoryRecord, LoadOutcome, Sample, SeriesBuffer, SeriesConfig, TimeRange};
use crate::state::DeviceStore;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A device history panel: bulk history plus live appends for one device.
///
/// The live feed is the store's raw update stream, so the chart sees every
/// update, not just the coalesced ones. Closing (or dropping) the view stops
/// the feed and discards any fetch still in flight.
pub struct HistoryView {
    device_id: String,
    buffer: Arc<Mutex<SeriesBuffer>>,
    api: Arc<ApiClient>,
    notices: Notices,
    alive: CancellationToken,
    revision: Arc<watch::Sender<u64>>,
}

impl HistoryView {
    /// Open a view and start following live updates for `device_id`
    pub fn open(
        device_id: &str,
        store: &DeviceStore,
        api: Arc<ApiClient>,
        notices: Notices,
        config: &SeriesConfig,
    ) -> Self {
        let buffer = Arc::new(Mutex::new(SeriesBuffer::new(device_id, config)));
        let (revision, _) = watch::channel(0u64);
        let revision = Arc::new(revision);
        let alive = CancellationToken::new();

        tokio::spawn(follow_live(
            device_id.to_string(),
            store.subscribe_raw(),
            Arc::clone(&buffer),
            Arc::clone(&revision),
            alive.clone(),
        ));

        info!(device_id = %device_id, "History view opened");

        Self {
            device_id: device_id.to_string(),
            buffer,
            api,
            notices,
            alive,
            revision,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Load `range` from the history endpoint
    pub async fn load_range(&self, range: TimeRange) -> LoadOutcome<ApiError> {
        let api = Arc::clone(&self.api);
        let device_id = self.device_id.clone();
        let query = range.clone();
        self.load_with(range, async move { api.fetch_device_history(&device_id, &query).await })
            .await
    }

    /// Switch to a new range token (`"1h"`, `"7d"`, an ISO start, ...)
    pub async fn handle_range_change(&self, token: &str) -> LoadOutcome<ApiError> {
        self.load_range(TimeRange::parse(token)).await
    }

    /// Load `range` using `fetch` for the records.
    ///
    /// The buffer is cleared immediately. The result only lands if no newer
    /// load started and the view is still open; a failure raises one error
    /// notice.
    pub async fn load_with<F>(&self, range: TimeRange, fetch: F) -> LoadOutcome<ApiError>
    where
        F: Future<Output = Result<Vec<HistoryRecord>, ApiError>>,
    {
        if self.alive.is_cancelled() {
            return LoadOutcome::Stale;
        }

        let ticket = self.buffer.lock().unwrap().begin_load(range);
        self.bump();

        let result = fetch
            .await
            .map(|records| records.iter().filter_map(Sample::from_record).collect());

        if self.alive.is_cancelled() {
            debug!(device_id = %self.device_id, "History view closed, discarding response");
            return LoadOutcome::Stale;
        }

        let outcome = self.buffer.lock().unwrap().complete_load(&ticket, result);
        match &outcome {
            LoadOutcome::Applied(count) => {
                debug!(device_id = %self.device_id, range = %ticket.range(), count, "History loaded");
                self.bump();
            }
            LoadOutcome::Failed(e) => {
                warn!(device_id = %self.device_id, error = %e, "History fetch failed");
                self.notices.error(e.to_string());
                self.bump();
            }
            LoadOutcome::Stale => {}
        }
        outcome
    }

    /// Render-ready samples
    pub fn view(&self) -> Arc<Vec<Sample>> {
        self.buffer.lock().unwrap().view()
    }

    pub fn set_downsample(&self, enabled: bool) {
        self.buffer.lock().unwrap().set_downsample(enabled);
        self.bump();
    }

    pub fn is_loading(&self) -> bool {
        self.buffer.lock().unwrap().is_loading()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self) -> TimeRange {
        self.buffer.lock().unwrap().range().clone()
    }

    /// Bumped whenever the buffer changes
    pub fn watch_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn is_open(&self) -> bool {
        !self.alive.is_cancelled()
    }

    /// Stop the live feed and drop any pending load result
    pub fn close(&self) {
        if self.alive.is_cancelled() {
            return;
        }
        self.alive.cancel();
        self.buffer.lock().unwrap().cancel_load();
        info!(device_id = %self.device_id, "History view closed");
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

impl Drop for HistoryView {
    fn drop(&mut self) {
        self.close();
    }
}

async fn follow_live(
    device_id: String,
    mut updates: broadcast::Receiver<crate::device::Device>,
    buffer: Arc<Mutex<SeriesBuffer>>,
    revision: Arc<watch::Sender<u64>>,
    alive: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = alive.cancelled() => break,
            result = updates.recv() => match result {
                Ok(device) => {
                    if device.id != device_id {
                        continue;
                    }
                    if buffer.lock().unwrap().append_live(&device) {
                        revision.send_modify(|r| *r += 1);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(device_id = %device_id, skipped, "Live history feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    debug!(device_id = %device_id, "Live history feed stopped");
}
