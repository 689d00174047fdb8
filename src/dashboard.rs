use crate::api::{ApiClient, ApiError, Notices};
use crate::config::LivedashConfig;
use crate::device::Device;
use crate::logs::{LogIdSequence, LogStream};
use crate::series::{HistoryView, TimeRange};
use crate::state::{run_flush_loop, DeviceStore};
use crate::transport::{
    run_transport, ConnectionManager, ConnectionState, Frame, Subscription, DEVICES_TOPIC,
};
use anyhow::{Context, Result};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Composition root: one per process, shared by `Arc`.
///
/// Owns the broker connection, the device store and everything views need
/// to open history panels and log streams.
pub struct Dashboard {
    config: LivedashConfig,
    manager: Arc<ConnectionManager>,
    /// Taken by `start`
    outbound: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    store: Arc<DeviceStore>,
    api: Arc<ApiClient>,
    notices: Notices,
    log_ids: LogIdSequence,
    histories: DashMap<String, Arc<HistoryView>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dashboard {
    pub fn new(config: LivedashConfig) -> Result<Arc<Self>> {
        let (manager, outbound) =
            ConnectionManager::new(config.transport.resubscribe_on_reconnect);
        let api = ApiClient::new(&config.api).context("Failed to build HTTP client")?;

        Ok(Arc::new(Self {
            config,
            manager,
            outbound: Mutex::new(Some(outbound)),
            store: Arc::new(DeviceStore::new()),
            api: Arc::new(api),
            notices: Notices::new(),
            log_ids: LogIdSequence::new(),
            histories: DashMap::new(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the transport driver and the store flush loop
    pub fn start(&self) -> Result<()> {
        let outbound = self
            .outbound
            .lock()
            .unwrap()
            .take()
            .context("Dashboard already started")?;

        let transport = tokio::spawn(run_transport(
            Arc::clone(&self.manager),
            outbound,
            self.config.transport.clone(),
            self.cancel.child_token(),
        ));
        let flusher = tokio::spawn(run_flush_loop(
            Arc::clone(&self.store),
            self.config.store.flush_interval(),
            self.cancel.child_token(),
        ));

        self.tasks.lock().unwrap().extend([transport, flusher]);
        info!("Dashboard started");
        Ok(())
    }

    /// Route `/topic/devices` into the store. Keep the handle for as long as
    /// the feed should run.
    pub fn mount_device_feed(&self) -> Subscription {
        let store = Arc::clone(&self.store);
        self.manager.subscribe(DEVICES_TOPIC, move |message| {
            if let Some(device) = Device::decode(&message.body) {
                store.ingest(device);
            }
        })
    }

    /// Replace the device collection with `GET /api/devices`
    pub async fn refresh_devices(&self) -> Result<usize, ApiError> {
        match self.api.fetch_devices().await {
            Ok(devices) => {
                let count = devices.len();
                self.store.replace_all(devices);
                info!(count, "Device list fetched");
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, "Device list fetch failed");
                self.notices.error(e.to_string());
                Err(e)
            }
        }
    }

    /// Open (or reopen) the history panel for `device_id` and start loading
    /// the default range
    pub fn open_history(&self, device_id: &str) -> Arc<HistoryView> {
        let view = Arc::new(HistoryView::open(
            device_id,
            &self.store,
            Arc::clone(&self.api),
            self.notices.clone(),
            &self.config.series,
        ));

        if let Some(previous) = self.histories.insert(device_id.to_string(), Arc::clone(&view)) {
            debug!(device_id = %device_id, "Replacing open history view");
            previous.close();
        }

        let range = TimeRange::parse(&self.config.series.default_range);
        let loader = Arc::clone(&view);
        tokio::spawn(async move {
            loader.load_range(range).await;
        });

        view
    }

    pub fn history(&self, device_id: &str) -> Option<Arc<HistoryView>> {
        self.histories.get(device_id).map(|v| Arc::clone(v.value()))
    }

    pub fn close_history(&self, device_id: &str) -> bool {
        match self.histories.remove(device_id) {
            Some((_, view)) => {
                view.close();
                true
            }
            None => false,
        }
    }

    /// Open a live log view backed by the shared id sequence
    pub fn open_log_stream(&self) -> LogStream {
        LogStream::open(
            &self.manager,
            self.log_ids.clone(),
            self.notices.clone(),
            &self.config.logs,
        )
    }

    pub fn connection_status(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.store
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn config(&self) -> &LivedashConfig {
        &self.config
    }

    /// Close every view, stop background tasks and wait for them
    pub async fn shutdown(&self) {
        info!("Shutting down dashboard");

        for entry in self.histories.iter() {
            entry.value().close();
        }
        self.histories.clear();

        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), task).await;
        }

        info!("Dashboard shut down complete");
    }
}
