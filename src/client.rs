//! Upstream record API.
//!
//! `RecordSource` is the seam the service polls and fetches through; it hands
//! back raw JSON and leaves normalization to `decode`. `HttpRecordSource` is
//! the reqwest implementation against the patient REST endpoints.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{FetchError, MonitorError};
use crate::search::SearchFilters;

/// Source of record payloads. Implementations report transport and status
/// failures as `FetchError`; payload shape is checked by the caller.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Value, FetchError>;

    /// Records created or changed after `since`.
    async fn fetch_updates_since(&self, since: DateTime<Utc>) -> Result<Value, FetchError>;

    async fn search(&self, query: &str, filters: &SearchFilters) -> Result<Value, FetchError>;

    async fn fetch_statistics(&self) -> Result<Value, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSourceConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    15
}

pub struct HttpRecordSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRecordSource {
    pub fn new(config: &HttpSourceConfig) -> Result<Self, MonitorError> {
        let mut base_url = Url::parse(config.base_url.trim()).map_err(|e| {
            MonitorError::Configuration(format!("Invalid baseUrl '{}': {}", config.base_url, e))
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(MonitorError::Configuration(format!(
                "baseUrl must be http or https, got '{}'",
                base_url.scheme()
            )));
        }
        if config.timeout_secs == 0 {
            return Err(MonitorError::Configuration(
                "timeoutSecs must be positive".to_string(),
            ));
        }
        // Url::join replaces the last segment unless the path ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MonitorError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|e| FetchError::Network(format!("Invalid endpoint '{}': {}", path, e)))
    }

    fn updates_url(&self, since: DateTime<Utc>) -> Result<Url, FetchError> {
        let mut url = self.endpoint("patients/updates")?;
        url.query_pairs_mut()
            .append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Millis, true));
        Ok(url)
    }

    fn search_url(&self, query: &str, filters: &SearchFilters) -> Result<Url, FetchError> {
        let mut url = self.endpoint("patients/search")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query.trim());
            if let Some(status) = filters.status {
                pairs.append_pair("status", status.as_str());
            }
            if let Some(department) = &filters.department {
                pairs.append_pair("department", department.trim());
            }
            if let Some(min_age) = filters.min_age {
                pairs.append_pair("minAge", &min_age.to_string());
            }
            if let Some(max_age) = filters.max_age {
                pairs.append_pair("maxAge", &max_age.to_string());
            }
        }
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, FetchError> {
        log::debug!("HttpRecordSource: GET {}", url);
        let resp = self.client.get(url).send().await?;

        if !resp.status().is_success() {
            let code = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status { code, body });
        }

        Ok(resp.json::<Value>().await?)
    }
}

#[async_trait]
impl RecordSource for HttpRecordSource {
    async fn fetch_all(&self) -> Result<Value, FetchError> {
        let url = self.endpoint("patients")?;
        self.get_json(url).await
    }

    async fn fetch_updates_since(&self, since: DateTime<Utc>) -> Result<Value, FetchError> {
        let url = self.updates_url(since)?;
        self.get_json(url).await
    }

    async fn search(&self, query: &str, filters: &SearchFilters) -> Result<Value, FetchError> {
        let url = self.search_url(query, filters)?;
        self.get_json(url).await
    }

    async fn fetch_statistics(&self) -> Result<Value, FetchError> {
        let url = self.endpoint("patients/statistics")?;
        self.get_json(url).await
    }
}
