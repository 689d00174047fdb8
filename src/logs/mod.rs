// Backend log stream: bounded ring buffer flushed on the render tick

mod filter;
mod record;
mod ring;
mod stream;

pub use filter::LogFilter;
pub use record::{HistoryLogEntry, LogIdSequence, LogLevel, LogRecord};
pub use ring::LogRingBuffer;
pub use stream::{LogStream, LogsConfig};
