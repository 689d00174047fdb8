// Broker transport: STOMP over a single WebSocket, multiplexed into topics

mod client;
mod frame;
mod manager;

pub use client::{run_transport, TransportConfig, TransportError};
pub use frame::{negotiate_heartbeat, parse_heartbeat, Command, Frame, FrameError};
pub use manager::{ConnectionManager, ConnectionState, MessageHandler, Subscription, TopicMessage};

/// Device state updates, one JSON device per message
pub const DEVICES_TOPIC: &str = "/topic/devices";

/// Backend log lines, one JSON log record per message
pub const LOGS_TOPIC: &str = "/topic/logs";
