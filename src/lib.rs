// Device model and state blob parsing
pub mod device;

// STOMP framing, subscription registry and socket driver
pub mod transport;

// Coalescing device store
pub mod state;

// Device history buffers and views
pub mod series;

// Live log ring buffer and filtering
pub mod logs;

// Log message classification
pub mod classify;

// REST client and user notices
pub mod api;

// Configuration loading
pub mod config;

// Wires everything together
pub mod dashboard;

pub use config::LivedashConfig;
pub use dashboard::Dashboard;
