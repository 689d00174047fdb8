use crate::logs::{LogLevel, LogRecord};
use std::collections::HashSet;

/// Lines matching this are engine chatter and hidden by default
const NOISE_MARKER: &str = "Processing event";

/// Display filter for the log view
#[derive(Clone, Debug)]
pub struct LogFilter {
    levels: HashSet<LogLevel>,
    /// Case-insensitive substring of the message
    pub search: String,
    /// Device id the message must mention
    pub device_id: String,
    pub hide_noise: bool,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            levels: HashSet::from([LogLevel::Info, LogLevel::Warn, LogLevel::Error]),
            search: String::new(),
            device_id: String::new(),
            hide_noise: true,
        }
    }
}

impl LogFilter {
    pub fn set_level(&mut self, level: LogLevel, shown: bool) {
        if shown {
            self.levels.insert(level);
        } else {
            self.levels.remove(&level);
        }
    }

    pub fn toggle_level(&mut self, level: LogLevel) {
        let shown = !self.shows_level(level);
        self.set_level(level, shown);
    }

    pub fn shows_level(&self, level: LogLevel) -> bool {
        self.levels.contains(&level)
    }

    pub fn matches(&self, record: &LogRecord) -> bool {
        if self.hide_noise && record.message.contains(NOISE_MARKER) {
            return false;
        }
        if !self.shows_level(record.level) {
            return false;
        }
        if !self.search.is_empty()
            && !record
                .message
                .to_lowercase()
                .contains(&self.search.to_lowercase())
        {
            return false;
        }
        self.device_id.is_empty() || record.message.contains(&self.device_id)
    }

    pub fn apply(&self, records: &[LogRecord]) -> Vec<LogRecord> {
        records.iter().filter(|r| self.matches(r)).cloned().collect()
    }
}
