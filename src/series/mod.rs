// Per-device time series for history views

mod buffer;
mod range;
mod sample;
mod view;

pub use buffer::{downsample, LoadOutcome, LoadTicket, SeriesBuffer, SeriesConfig};
pub use range::{TimeRange, DEFAULT_RANGE};
pub use sample::{HistoryRecord, Sample};
pub use view::HistoryView;
