// Device collection with coalesced, fixed-cadence commits

mod flusher;
mod store;

pub use flusher::{run_flush_loop, StoreConfig};
pub use store::{DeviceStore, StoreCommit};
