//! Log line classification for display.
//!
//! Recognises the simulation engine's structured messages and turns them
//! into short, icon-tagged summaries. Anything else is shown verbatim with
//! embedded device UUIDs replaced by device names.

use crate::device::Device;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;


pub const OPACITY_DEFAULT: f32 = 1.0;
const OPACITY_DIMMED: f32 = 0.5;
const OPACITY_DB_WRITE: f32 = 0.7;

static EVENT_CHAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"SIM ENGINE: Starting event chain for device: (.*)").expect("valid regex")
});

static RULES_FOUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"SIM ENGINE \(Depth \d+\): Found (\d+) relevant rules.").expect("valid regex")
});

static CONDITION_MET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"SIM ENGINE \(Depth \d+\): Condition met for rule '(.*)'. Executing action.")
        .expect("valid regex")
});

static UPDATING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"SIM ENGINE: Updating device (.*) with new state: (.*)").expect("valid regex")
});

static DB_WRITE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"INFLUXDB: Wrote data for device (.*)").expect("valid regex"));

static QUERY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Executing Flux query:\n([\s\S]*)").expect("valid regex"));

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("valid regex")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogIcon {
    EventChain,
    /// Dimmed when no rules matched
    Rules { active: bool },
    ConditionMet,
    DeviceUpdate,
    DatabaseWrite,
    Query,
}

/// Piece of a classified line
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Fragment {
    Text(String),
    /// Device name (or shortened id)
    Device(String),
    /// Emphasised value such as a rule name
    Emphasis(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassifiedLog {
    pub icon: Option<LogIcon>,
    pub content: Vec<Fragment>,
    /// Extra text revealed when the entry is expanded
    pub details: Option<String>,
    pub expandable: bool,
    pub opacity: f32,
}

impl ClassifiedLog {
    fn new(icon: LogIcon, content: Vec<Fragment>) -> Self {
        Self {
            icon: Some(icon),
            content,
            details: None,
            expandable: false,
            opacity: OPACITY_DEFAULT,
        }
    }

    fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self.expandable = true;
        self
    }

    fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    /// Content flattened to plain text
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|f| match f {
                Fragment::Text(s) | Fragment::Device(s) | Fragment::Emphasis(s) => s.as_str(),
            })
            .collect()
    }
}

/// Device id -> display name
pub fn device_names(devices: &[Device]) -> HashMap<String, String> {
    devices
        .iter()
        .map(|d| (d.id.clone(), d.name.clone()))
        .collect()
}

type Handler = fn(&Captures, &HashMap<String, String>) -> ClassifiedLog;

/// Classify one log message. Never fails; unknown shapes fall through to
/// the name-resolving plain rendering.
pub fn classify(message: &str, names: &HashMap<String, String>) -> ClassifiedLog {
    let handlers: [(&Regex, Handler); 6] = [
        (&EVENT_CHAIN_RE, event_chain as Handler),
        (&RULES_FOUND_RE, rules_found as Handler),
        (&CONDITION_MET_RE, condition_met as Handler),
        (&UPDATING_RE, updating as Handler),
        (&DB_WRITE_RE, db_write as Handler),
        (&QUERY_RE, query as Handler),
    ];

    for (regex, handler) in handlers {
        if let Some(caps) = regex.captures(message) {
            return handler(&caps, names);
        }
    }

    ClassifiedLog {
        icon: None,
        content: resolve_names(message, names),
        details: None,
        expandable: false,
        opacity: OPACITY_DEFAULT,
    }
}

fn device_name(id: &str, names: &HashMap<String, String>) -> String {
    names.get(id).cloned().unwrap_or_else(|| id.to_string())
}

fn event_chain(caps: &Captures, names: &HashMap<String, String>) -> ClassifiedLog {
    ClassifiedLog::new(
        LogIcon::EventChain,
        vec![
            Fragment::Text("Event Chain Start: ".to_string()),
            Fragment::Device(device_name(&caps[1], names)),
        ],
    )
}

fn rules_found(caps: &Captures, _names: &HashMap<String, String>) -> ClassifiedLog {
    let count: u64 = caps[1].parse().unwrap_or(0);
    let active = count > 0;
    let opacity = if active { OPACITY_DEFAULT } else { OPACITY_DIMMED };

    ClassifiedLog::new(
        LogIcon::Rules { active },
        vec![Fragment::Text(format!("{count} relevant rule(s) found"))],
    )
    .with_opacity(opacity)
}

fn condition_met(caps: &Captures, _names: &HashMap<String, String>) -> ClassifiedLog {
    ClassifiedLog::new(
        LogIcon::ConditionMet,
        vec![
            Fragment::Text("Rule ".to_string()),
            Fragment::Emphasis(format!("\"{}\"", &caps[1])),
            Fragment::Text(" triggered".to_string()),
        ],
    )
}

fn updating(caps: &Captures, names: &HashMap<String, String>) -> ClassifiedLog {
    let raw = &caps[2];
    let details = serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| raw.to_string());

    ClassifiedLog::new(
        LogIcon::DeviceUpdate,
        vec![
            Fragment::Text("Updating device: ".to_string()),
            Fragment::Device(device_name(&caps[1], names)),
        ],
    )
    .with_details(details)
}

fn db_write(caps: &Captures, names: &HashMap<String, String>) -> ClassifiedLog {
    ClassifiedLog::new(
        LogIcon::DatabaseWrite,
        vec![
            Fragment::Text("Saved to DB: ".to_string()),
            Fragment::Device(device_name(&caps[1], names)),
        ],
    )
    .with_opacity(OPACITY_DB_WRITE)
}

fn query(caps: &Captures, _names: &HashMap<String, String>) -> ClassifiedLog {
    ClassifiedLog::new(
        LogIcon::Query,
        vec![Fragment::Text("Aggregation Query Executed".to_string())],
    )
    .with_details(caps[1].trim().to_string())
}

/// Split `message` around UUIDs, replacing each with its device name or
/// an 8-character prefix.
fn resolve_names(message: &str, names: &HashMap<String, String>) -> Vec<Fragment> {
    let mut parts = Vec::new();
    let mut last = 0;

    for m in UUID_RE.find_iter(message) {
        if m.start() > last {
            parts.push(Fragment::Text(message[last..m.start()].to_string()));
        }
        let id = m.as_str();
        let display = match names.get(id) {
            Some(name) => name.clone(),
            None => format!("{}...", &id[..8]),
        };
        parts.push(Fragment::Device(display));
        last = m.end();
    }

    if last < message.len() {
        parts.push(Fragment::Text(message[last..].to_string()));
    }
    parts
}
