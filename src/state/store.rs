use crate::device::Device;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Published after every commit that changed the canonical collection
#[derive(Clone, Debug)]
pub struct StoreCommit {
    pub version: u64,
    pub devices: Arc<Vec<Device>>,
}

/// Updates received since the last commit, one per device id
#[derive(Default)]
struct Pending {
    order: Vec<Device>,
    index: HashMap<String, usize>,
}

impl Pending {
    fn insert(&mut self, device: Device) {
        match self.index.get(&device.id) {
            Some(&pos) => self.order[pos] = device,
            None => {
                self.index.insert(device.id.clone(), self.order.len());
                self.order.push(device);
            }
        }
    }

    fn discard(&mut self, id: &str) {
        if self.index.remove(id).is_some() {
            self.order.retain(|d| d.id != id);
            self.index = self
                .order
                .iter()
                .enumerate()
                .map(|(pos, d)| (d.id.clone(), pos))
                .collect();
        }
    }

    fn take(&mut self) -> Vec<Device> {
        self.index.clear();
        std::mem::take(&mut self.order)
    }
}

/// Canonical device collection with coalesced updates.
///
/// `ingest` only records the latest value per device; `commit` applies the
/// pending values and swaps in a new snapshot when something actually
/// changed. Readers hold an `Arc` to an immutable snapshot and never see a
/// half-applied commit.
pub struct DeviceStore {
    devices: RwLock<Arc<Vec<Device>>>,
    pending: Mutex<Pending>,

    /// Every ingested device, before coalescing
    raw_tx: broadcast::Sender<Device>,

    commit_tx: broadcast::Sender<StoreCommit>,
    version: AtomicU64,
}

impl DeviceStore {
    pub fn new() -> Self {
        let (raw_tx, _) = broadcast::channel(1000);
        let (commit_tx, _) = broadcast::channel(64);

        Self {
            devices: RwLock::new(Arc::new(Vec::new())),
            pending: Mutex::new(Pending::default()),
            raw_tx,
            commit_tx,
            version: AtomicU64::new(0),
        }
    }

    /// Record an inbound device update (last write wins until the next commit)
    pub fn ingest(&self, device: Device) {
        trace!(device_id = %device.id, "Device update queued");
        let _ = self.raw_tx.send(device.clone());
        self.pending.lock().unwrap().insert(device);
    }

    /// Apply pending updates.
    ///
    /// Returns true when the canonical collection changed. When every
    /// pending value equals the current one, the snapshot is left untouched
    /// (same `Arc`).
    pub fn commit(&self) -> bool {
        let pending = self.pending.lock().unwrap().take();
        if pending.is_empty() {
            return false;
        }

        let mut guard = self.devices.write().unwrap();
        let mut next: Option<Vec<Device>> = None;

        // Pending holds at most one entry per id
        let current = guard.as_slice();
        let index: HashMap<&str, usize> = current
            .iter()
            .enumerate()
            .map(|(pos, d)| (d.id.as_str(), pos))
            .collect();

        for device in pending {
            match index.get(device.id.as_str()) {
                Some(&pos) if current[pos] == device => {}
                Some(&pos) => {
                    next.get_or_insert_with(|| current.to_vec())[pos] = device;
                }
                None => {
                    next.get_or_insert_with(|| current.to_vec()).push(device);
                }
            }
        }

        let Some(next) = next else {
            trace!("Commit skipped, nothing changed");
            return false;
        };

        let devices = Arc::new(next);
        *guard = Arc::clone(&devices);
        drop(guard);

        self.publish(devices);
        true
    }

    /// Apply a batch of updates as one commit
    pub fn apply_batch(&self, devices: Vec<Device>) -> bool {
        {
            let mut pending = self.pending.lock().unwrap();
            for device in devices {
                pending.insert(device);
            }
        }
        self.commit()
    }

    /// Replace the whole collection, e.g. with the result of the initial fetch
    pub fn replace_all(&self, devices: Vec<Device>) {
        let devices = Arc::new(devices);
        {
            let mut guard = self.devices.write().unwrap();
            if guard.as_slice() == devices.as_slice() {
                return;
            }
            *guard = Arc::clone(&devices);
        }
        debug!(count = devices.len(), "Device collection replaced");
        self.publish(devices);
    }

    /// Drop a device deleted elsewhere, along with any pending update for it
    pub fn remove(&self, id: &str) -> bool {
        self.pending.lock().unwrap().discard(id);

        let devices = {
            let mut guard = self.devices.write().unwrap();
            if !guard.iter().any(|d| d.id == id) {
                return false;
            }
            let next: Vec<Device> = guard.iter().filter(|d| d.id != id).cloned().collect();
            let next = Arc::new(next);
            *guard = Arc::clone(&next);
            next
        };

        debug!(device_id = %id, "Device removed");
        self.publish(devices);
        true
    }

    fn publish(&self, devices: Arc<Vec<Device>>) {
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.commit_tx.send(StoreCommit { version, devices });
    }

    /// Current snapshot
    pub fn devices(&self) -> Arc<Vec<Device>> {
        Arc::clone(&self.devices.read().unwrap())
    }

    pub fn get(&self, id: &str) -> Option<Device> {
        self.devices.read().unwrap().iter().find(|d| d.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of updates waiting for the next commit
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().order.len()
    }

    /// Number of snapshots published so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Subscribe to raw (uncoalesced) device updates
    pub fn subscribe_raw(&self) -> broadcast::Receiver<Device> {
        self.raw_tx.subscribe()
    }

    /// Subscribe to committed snapshots
    pub fn subscribe_commits(&self) -> broadcast::Receiver<StoreCommit> {
        self.commit_tx.subscribe()
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}
