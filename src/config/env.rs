use crate::config::LivedashConfig;
use std::str::FromStr;
use tracing::warn;

/// Apply `LIVEDASH_*` environment variables on top of `config`
pub fn apply_env_overrides(config: &mut LivedashConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`; unparseable values are ignored.
pub fn apply_overrides<F>(config: &mut LivedashConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("LIVEDASH_WS_URL") {
        config.transport.url = v;
    }
    if let Some(v) = lookup("LIVEDASH_API_URL") {
        config.api.base_url = v;
    }
    if let Some(n) = parsed(&lookup, "LIVEDASH_FLUSH_INTERVAL_MS") {
        config.store.flush_interval_ms = n;
    }
    if let Some(n) = parsed(&lookup, "LIVEDASH_LOG_CAPACITY") {
        config.logs.capacity = n;
    }
    if let Some(b) = parsed(&lookup, "LIVEDASH_RESUBSCRIBE") {
        config.transport.resubscribe_on_reconnect = b;
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}
