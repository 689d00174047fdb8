use chrono::{DateTime, Utc};
use std::fmt;

/// Token used when a range cannot be parsed
pub const DEFAULT_RANGE: &str = "15m";

/// Time window selected for a history view.
///
/// Relative ranges (`"15m"`, `"-7d"`) slide with the clock and bound the
/// live buffer. Absolute ranges (ISO-8601 start, optionally `start/stop`)
/// are fixed and never evict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeRange {
    Relative {
        token: String,
        window_ms: i64,
    },
    Absolute {
        start: DateTime<Utc>,
        stop: Option<DateTime<Utc>>,
    },
}

impl TimeRange {
    /// Parse a range token, falling back to [`DEFAULT_RANGE`].
    pub fn parse(token: &str) -> Self {
        Self::try_parse(token).unwrap_or_default()
    }

    pub fn try_parse(token: &str) -> Option<Self> {
        let token = token.trim();

        if token.contains('T') {
            let (start, stop) = match token.split_once('/') {
                Some((start, stop)) => (start, Some(stop)),
                None => (token, None),
            };
            let start = parse_instant(start)?;
            let stop = match stop {
                Some(stop) => Some(parse_instant(stop)?),
                None => None,
            };
            return Some(TimeRange::Absolute { start, stop });
        }

        let window_ms = relative_window_ms(token)?;
        Some(TimeRange::Relative {
            token: token.trim_start_matches('-').to_string(),
            window_ms,
        })
    }

    pub fn absolute(start: DateTime<Utc>, stop: Option<DateTime<Utc>>) -> Self {
        TimeRange::Absolute { start, stop }
    }

    /// Sliding window length, `None` for absolute ranges
    pub fn window_ms(&self) -> Option<i64> {
        match self {
            TimeRange::Relative { window_ms, .. } => Some(*window_ms),
            TimeRange::Absolute { .. } => None,
        }
    }

    /// Query parameters for the history endpoint
    pub fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            TimeRange::Relative { token, .. } => vec![("start", token.clone())],
            TimeRange::Absolute { start, stop } => {
                let mut params = vec![("start", start.to_rfc3339())];
                if let Some(stop) = stop {
                    params.push(("stop", stop.to_rfc3339()));
                }
                params
            }
        }
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        TimeRange::Relative {
            token: DEFAULT_RANGE.to_string(),
            window_ms: 15 * 60 * 1000,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeRange::Relative { token, .. } => f.write_str(token),
            TimeRange::Absolute { start, stop: None } => write!(f, "{}", start.to_rfc3339()),
            TimeRange::Absolute {
                start,
                stop: Some(stop),
            } => write!(f, "{}/{}", start.to_rfc3339(), stop.to_rfc3339()),
        }
    }
}

fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// `<integer><s|m|h|d>` in milliseconds, with an optional leading `-`
fn relative_window_ms(token: &str) -> Option<i64> {
    let token = token.strip_prefix('-').unwrap_or(token);
    let unit = token.chars().last()?;
    let digits = &token[..token.len() - unit.len_utf8()];

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let unit_ms: i64 = match unit {
        's' => 1_000,
        'm' => 60_000,
        'h' => 3_600_000,
        'd' => 86_400_000,
        _ => return None,
    };

    let amount: i64 = digits.parse().ok()?;
    if amount == 0 {
        return None;
    }
    amount.checked_mul(unit_ms)
}
