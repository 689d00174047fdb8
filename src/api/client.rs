use crate::device::Device;
use crate::logs::HistoryLogEntry;
use crate::series::{HistoryRecord, TimeRange};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// REST backend configuration
#[derive(Clone, Debug, Deserialize)]
pub struct ApiConfig {
    /// Base URL the `/api/...` paths are appended to
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Range used for the log view's initial backfill
    #[serde(default = "default_log_history_range")]
    pub log_history_range: String,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_log_history_range() -> String {
    "1h".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_timeout_seconds(),
            log_history_range: default_log_history_range(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx response; carries the backend's message when it sent one
    #[error("{0}")]
    Status(String),

    #[error("Unexpected response body: {0}")]
    Decode(String),
}

/// Backend error body
#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Read-only client for the dashboard's REST endpoints
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(concat!("livedash/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /api/devices`
    pub async fn fetch_devices(&self) -> Result<Vec<Device>, ApiError> {
        self.get_list("/api/devices", &[]).await
    }

    /// `GET /api/devices/{id}/history?start=...[&stop=...]`
    pub async fn fetch_device_history(
        &self,
        device_id: &str,
        range: &TimeRange,
    ) -> Result<Vec<HistoryRecord>, ApiError> {
        let path = format!("/api/devices/{}/history", urlencoding::encode(device_id));
        self.get_list(&path, &range.query()).await
    }

    /// `GET /api/logs/history?range=...`
    pub async fn fetch_log_history(&self, range: &str) -> Result<Vec<HistoryLogEntry>, ApiError> {
        self.get_list("/api/logs/history", &[("range", range.to_string())])
            .await
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, ?query, "GET");

        let response = self.http.get(&url).query(query).send().await?;
        let response = check_status(response).await?;

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let fallback = format!(
        "Request failed: {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or(fallback);

    Err(ApiError::Status(message.trim_end().to_string()))
}
