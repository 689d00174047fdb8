mod env;
pub use env::{apply_env_overrides, apply_overrides};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// Re-export per-module config types
pub use crate::api::ApiConfig;
pub use crate::logs::LogsConfig;
pub use crate::series::SeriesConfig;
pub use crate::state::StoreConfig;
pub use crate::transport::TransportConfig;

/// Complete dashboard configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LivedashConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub series: SeriesConfig,
    #[serde(default)]
    pub logs: LogsConfig,
}

/// Load configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> Result<LivedashConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: LivedashConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// File (when given) plus environment overrides
pub fn resolve_config(path: Option<&str>) -> Result<LivedashConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => LivedashConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LivedashConfig::default();
        assert_eq!(config.transport.url, "ws://localhost:8080/ws");
        assert_eq!(config.transport.reconnect_delay_ms, 5000);
        assert!(!config.transport.resubscribe_on_reconnect);
        assert_eq!(config.api.base_url, "http://localhost:8080");
        assert_eq!(config.store.flush_interval_ms, 100);
        assert_eq!(config.series.downsample_threshold, 1000);
        assert_eq!(config.series.default_range, "15m");
        assert_eq!(config.logs.capacity, 1000);
        assert_eq!(config.logs.frame_interval_ms, 16);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [transport]
            url = "ws://iot.local/ws"
            reconnect_delay_ms = 2000
            heartbeat_outgoing_ms = 0
            resubscribe_on_reconnect = true

            [api]
            base_url = "http://iot.local"
            timeout_seconds = 3

            [store]
            flush_interval_ms = 250

            [series]
            default_range = "1h"
            downsample_threshold = 500
            window_slack = 1.5

            [logs]
            capacity = 200
            frame_interval_ms = 33
        "#;

        let config: LivedashConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.transport.url, "ws://iot.local/ws");
        assert_eq!(config.transport.reconnect_delay_ms, 2000);
        assert_eq!(config.transport.heartbeat_outgoing_ms, 0);
        assert_eq!(config.transport.heartbeat_incoming_ms, 4000);
        assert!(config.transport.resubscribe_on_reconnect);
        assert_eq!(config.api.timeout_seconds, 3);
        assert_eq!(config.store.flush_interval_ms, 250);
        assert_eq!(config.series.window_slack, 1.5);
        assert_eq!(config.logs.capacity, 200);
    }

    #[test]
    fn test_partial_config() {
        // Missing sections use defaults
        let toml = r#"
            [logs]
            capacity = 50
        "#;

        let config: LivedashConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.logs.capacity, 50);
        assert_eq!(config.logs.frame_interval_ms, 16);
        assert_eq!(config.store.flush_interval_ms, 100);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store]\nflush_interval_ms = 40").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.store.flush_interval_ms, 40);
    }

    #[test]
    fn test_load_config_errors_carry_path() {
        let err = load_config("/nonexistent/livedash.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/livedash.toml"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store\nbroken").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_overrides() {
        let vars = HashMap::from([
            ("LIVEDASH_WS_URL", "ws://other/ws"),
            ("LIVEDASH_API_URL", "http://other"),
            ("LIVEDASH_FLUSH_INTERVAL_MS", "50"),
            ("LIVEDASH_LOG_CAPACITY", "not a number"),
            ("LIVEDASH_RESUBSCRIBE", "true"),
        ]);

        let mut config = LivedashConfig::default();
        apply_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.transport.url, "ws://other/ws");
        assert_eq!(config.api.base_url, "http://other");
        assert_eq!(config.store.flush_interval_ms, 50);
        assert_eq!(config.logs.capacity, 1000);
        assert!(config.transport.resubscribe_on_reconnect);
    }
}
