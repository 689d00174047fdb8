use crate::device::Device;
use crate::series::{Sample, TimeRange};
use chrono::Utc;
use serde::Deserialize;
use std::cell::OnceCell;
use std::sync::Arc;
use tracing::{debug, trace};

/// History view configuration
#[derive(Clone, Debug, Deserialize)]
pub struct SeriesConfig {
    /// Range a history view opens with
    #[serde(default = "default_range")]
    pub default_range: String,
    /// Above this many samples the view is stride-downsampled
    #[serde(default = "default_downsample_threshold")]
    pub downsample_threshold: usize,
    /// Multiplier on the live window before samples are evicted
    #[serde(default = "default_window_slack")]
    pub window_slack: f64,
}

fn default_range() -> String {
    crate::series::DEFAULT_RANGE.to_string()
}

fn default_downsample_threshold() -> usize {
    1000
}

fn default_window_slack() -> f64 {
    1.1
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            default_range: default_range(),
            downsample_threshold: default_downsample_threshold(),
            window_slack: default_window_slack(),
        }
    }
}

/// Issued by [`SeriesBuffer::begin_load`]; only the newest ticket may land
#[derive(Clone, Debug)]
pub struct LoadTicket {
    generation: u64,
    range: TimeRange,
}

impl LoadTicket {
    pub fn range(&self) -> &TimeRange {
        &self.range
    }
}

#[derive(Debug)]
pub enum LoadOutcome<E> {
    /// Buffer now holds this many samples
    Applied(usize),
    /// A newer load started (or the view closed) before this one finished
    Stale,
    Failed(E),
}

impl<E> LoadOutcome<E> {
    pub fn is_applied(&self) -> bool {
        matches!(self, LoadOutcome::Applied(_))
    }
}

/// Every `ceil(len / threshold)`-th sample, starting with the first
pub fn downsample(samples: &[Sample], threshold: usize) -> Vec<Sample> {
    if threshold == 0 || samples.len() <= threshold {
        return samples.to_vec();
    }
    let stride = samples.len().div_ceil(threshold);
    samples.iter().step_by(stride).cloned().collect()
}

/// Full-resolution samples for one device plus a derived render view.
///
/// Pure state: fetching and timers live in
/// [`HistoryView`](crate::series::HistoryView).
pub struct SeriesBuffer {
    device_id: String,
    range: TimeRange,
    samples: Vec<Sample>,
    downsample: bool,
    loading: bool,
    generation: u64,
    threshold: usize,
    slack: f64,
    view: OnceCell<Arc<Vec<Sample>>>,
}

impl SeriesBuffer {
    pub fn new(device_id: impl Into<String>, config: &SeriesConfig) -> Self {
        Self {
            device_id: device_id.into(),
            range: TimeRange::parse(&config.default_range),
            samples: Vec::new(),
            downsample: true,
            loading: false,
            generation: 0,
            threshold: config.downsample_threshold,
            slack: config.window_slack,
            view: OnceCell::new(),
        }
    }

    fn invalidate(&mut self) {
        self.view.take();
    }

    /// Start a bulk load for `range`.
    ///
    /// Clears the buffer, re-enables downsampling and supersedes any load
    /// still in flight.
    pub fn begin_load(&mut self, range: TimeRange) -> LoadTicket {
        self.generation += 1;
        self.range = range.clone();
        self.samples.clear();
        self.downsample = true;
        self.loading = true;
        self.invalidate();

        debug!(device_id = %self.device_id, range = %range, generation = self.generation, "History load started");
        LoadTicket {
            generation: self.generation,
            range,
        }
    }

    /// Land the result of a bulk load.
    ///
    /// Results for superseded tickets are discarded. A failure leaves the
    /// buffer empty rather than showing the previous range.
    pub fn complete_load<E>(
        &mut self,
        ticket: &LoadTicket,
        result: Result<Vec<Sample>, E>,
    ) -> LoadOutcome<E> {
        if ticket.generation != self.generation {
            debug!(
                device_id = %self.device_id,
                range = %ticket.range,
                "Discarding stale history response"
            );
            return LoadOutcome::Stale;
        }

        self.loading = false;
        self.invalidate();

        match result {
            Ok(mut samples) => {
                samples.sort_by_key(|s| s.time_ms);
                self.samples = samples;
                LoadOutcome::Applied(self.samples.len())
            }
            Err(e) => {
                self.samples.clear();
                LoadOutcome::Failed(e)
            }
        }
    }

    /// Abandon the in-flight load, if any
    pub fn cancel_load(&mut self) {
        if self.loading {
            self.generation += 1;
            self.loading = false;
        }
    }

    /// Append a live update stamped with the current time
    pub fn append_live(&mut self, device: &Device) -> bool {
        self.append_live_at(device, Utc::now().timestamp_millis())
    }

    /// Append a live update stamped `now_ms`.
    ///
    /// Returns false when the update is for another device or carries no
    /// numeric fields.
    pub fn append_live_at(&mut self, device: &Device, now_ms: i64) -> bool {
        if device.id != self.device_id {
            return false;
        }
        let Some(sample) = Sample::from_device(device, now_ms) else {
            trace!(device_id = %self.device_id, "Live update without numeric fields dropped");
            return false;
        };

        match self.samples.last() {
            Some(last) if last.time_ms > sample.time_ms => {
                let pos = self.samples.partition_point(|s| s.time_ms <= sample.time_ms);
                self.samples.insert(pos, sample);
            }
            _ => self.samples.push(sample),
        }

        self.evict(now_ms);
        self.invalidate();
        true
    }

    fn evict(&mut self, now_ms: i64) {
        let Some(window_ms) = self.range.window_ms() else {
            return;
        };
        let retain_ms = (window_ms as f64 * self.slack).round() as i64;
        let cutoff = now_ms.saturating_sub(retain_ms);

        let expired = self.samples.partition_point(|s| s.time_ms < cutoff);
        if expired > 0 {
            self.samples.drain(..expired);
            trace!(device_id = %self.device_id, expired, "Evicted samples outside window");
        }
    }

    /// Render view: downsampled when enabled and above the threshold
    pub fn view(&self) -> Arc<Vec<Sample>> {
        Arc::clone(self.view.get_or_init(|| {
            if self.downsample {
                Arc::new(downsample(&self.samples, self.threshold))
            } else {
                Arc::new(self.samples.clone())
            }
        }))
    }

    pub fn set_downsample(&mut self, enabled: bool) {
        if self.downsample != enabled {
            self.downsample = enabled;
            self.invalidate();
        }
    }

    pub fn downsample_enabled(&self) -> bool {
        self.downsample
    }

    /// Full-resolution samples
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn range(&self) -> &TimeRange {
        &self.range
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}
