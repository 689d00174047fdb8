use crate::device::{numeric_value, Device};
use chrono::DateTime;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One row of the device history endpoint
pub type HistoryRecord = Map<String, Value>;

/// Record keys that never carry a metric
const RESERVED_KEYS: &[&str] = &["result", "table", "deviceId"];

/// A point in a device's time series
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Milliseconds since the Unix epoch
    pub time_ms: i64,
    pub fields: BTreeMap<String, f64>,
}

impl Sample {
    /// `None` when there is nothing to plot
    pub fn new(time_ms: i64, fields: BTreeMap<String, f64>) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }
        Some(Self { time_ms, fields })
    }

    /// Build a sample from a history record (`_time` plus metric columns)
    pub fn from_record(record: &HistoryRecord) -> Option<Self> {
        let time = record.get("_time")?.as_str()?;
        let time_ms = DateTime::parse_from_rfc3339(time).ok()?.timestamp_millis();

        let fields = record
            .iter()
            .filter(|(key, _)| !key.starts_with('_') && !RESERVED_KEYS.contains(&key.as_str()))
            .filter_map(|(key, value)| numeric_value(value).map(|n| (key.clone(), n)))
            .collect();

        Self::new(time_ms, fields)
    }

    /// Build a sample from a live device update
    pub fn from_device(device: &Device, time_ms: i64) -> Option<Self> {
        Self::new(time_ms, device.numeric_state())
    }
}
