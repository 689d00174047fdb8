use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown log level: {s}"))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend log line ready for display
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Render key: negative for backfilled history, live ids count up from 0
    pub id: i64,
    pub timestamp: String,
    pub level: LogLevel,
    pub logger_name: String,
    pub message: String,
}

/// Body of a `/topic/logs` message
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LiveLogPayload {
    pub timestamp: String,
    pub level: String,
    #[serde(default)]
    pub logger_name: String,
    pub message: String,
}

/// Row of `GET /api/logs/history`
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryLogEntry {
    #[serde(rename = "_time")]
    pub time: String,
    pub level: String,
    #[serde(default)]
    pub logger_name: String,
    #[serde(default)]
    pub message: String,
}

/// Live log id counter.
///
/// Shared by every log view for the lifetime of the dashboard so live ids
/// keep increasing across remounts.
#[derive(Clone, Debug, Default)]
pub struct LogIdSequence {
    next: Arc<AtomicI64>,
}

impl LogIdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Id the next live record will get
    pub fn peek(&self) -> i64 {
        self.next.load(Ordering::Relaxed)
    }
}
