use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

mod state_blob;

pub use state_blob::parse_numeric_fields;
pub(crate) use state_blob::numeric_value;

/// Where a device's readings come from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceKind {
    Virtual,
    Physical,
}

/// Whether a device reports values or acts on commands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceRole {
    Sensor,
    Actuator,
}

/// Latest known state of a device, as broadcast on `/topic/devices`.
///
/// Identity is `id`. Every other field is replaced wholesale on update;
/// the dashboard never merges individual fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Stable unique identifier (UUID assigned by the backend)
    pub id: String,

    pub name: String,

    #[serde(rename = "type")]
    pub kind: DeviceKind,

    pub role: DeviceRole,

    /// Opaque JSON object of metric name -> numeric or string value.
    ///
    /// The backend sends this either as an embedded JSON string or as a
    /// raw JSON object; both are normalised to the string form.
    #[serde(
        default = "state_blob::empty_blob",
        deserialize_with = "state_blob::deserialize_blob"
    )]
    pub current_state: String,

    #[serde(default, deserialize_with = "state_blob::deserialize_optional_blob")]
    pub simulation_config: Option<String>,

    #[serde(default)]
    pub simulation_active: bool,

    #[serde(default, deserialize_with = "null_as_false")]
    pub online: bool,
}

impl Device {
    /// Decode a device from a transport message body.
    ///
    /// Malformed payloads are dropped: the caller gets `None` and nothing
    /// is surfaced beyond a debug log line.
    pub fn decode(body: &str) -> Option<Device> {
        match serde_json::from_str::<Device>(body) {
            Ok(device) => Some(device),
            Err(e) => {
                debug!(error = %e, "Dropping malformed device payload");
                None
            }
        }
    }

    /// Numeric view of `current_state`
    pub fn numeric_state(&self) -> std::collections::BTreeMap<String, f64> {
        parse_numeric_fields(&self.current_state)
    }
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}
