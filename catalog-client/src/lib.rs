//! Catalog API client for fetching dataset catalog records.
//!
//! This crate provides:
//! - [`CatalogSource`] config enum for choosing between mock and live clients
//! - [`CatalogFetcher`] trait for abstracting catalog access
//! - [`CatalogClient`] production client talking to the catalog REST API
//! - [`MockCatalogClient`] in-memory client for tests and local development
//!
//! ## Usage
//!
//! ```ignore
//! use catalog_client::{CatalogConfig, CatalogSource};
//!
//! let config = CatalogConfig::from_host("metax.example.org", "user", "secret");
//! let fetcher = CatalogSource::live(config).into_fetcher()?;
//!
//! let records = fetcher.list_latest_records().await?;
//! ```

mod mock;

pub use mock::MockCatalogClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dataset_indexer_shared::{CatalogRecord, RecordError, RecordId, RetryPolicy};
use reqwest::header::ACCEPT;
use reqwest::{Client as ReqwestClient, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, error, info, instrument};

/// Request timeout for catalog calls. Full listings are slow.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1200;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("catalog returned status {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("record error: {0}")]
    Record(#[from] RecordError),
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

impl CatalogError {
    /// Whether retrying the same call could succeed.
    ///
    /// Only network level failures count; an HTTP error status is an answer.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Reqwest(e) => e.is_connect() || e.is_timeout(),
            Self::Unavailable(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Trait for reading records from the catalog.
///
/// Production code uses [`CatalogClient`]; tests use [`MockCatalogClient`].
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    /// Fetch a single record by identifier.
    async fn get_record(&self, id: &RecordId) -> Result<CatalogRecord>;

    /// Fetch every record that is the latest version of its dataset.
    async fn list_latest_records(&self) -> Result<Vec<CatalogRecord>>;

    /// Fetch the identifiers of every latest-version record.
    async fn list_latest_identifiers(&self) -> Result<Vec<RecordId>>;
}

/// Connection settings for the catalog API.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Base URL of the dataset collection, e.g. `https://host/rest/datasets`.
    pub base_url: String,
    pub user: String,
    pub password: String,
    pub verify_ssl: bool,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl CatalogConfig {
    /// Build a config for the catalog served by `host` over HTTPS.
    pub fn from_host(host: &str, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(format!("https://{}/rest/datasets", host), user, password)
    }

    /// Build a config for an explicit dataset collection URL.
    pub fn new(
        base_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user: user.into(),
            password: password.into(),
            verify_ssl: true,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::exponential(3, Duration::from_secs(4), 2),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn record_url(&self, id: &RecordId) -> String {
        format!("{}/{}", self.base_url, id)
    }

    fn latest_records_url(&self) -> String {
        format!("{}?no_pagination=true&latest", self.base_url)
    }

    fn latest_identifiers_url(&self) -> String {
        format!("{}/identifiers?latest", self.base_url)
    }
}

/// Production catalog client.
pub struct CatalogClient {
    config: CatalogConfig,
    client: ReqwestClient,
}

impl CatalogClient {
    pub fn new(config: CatalogConfig) -> Result<Self> {
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;

        info!(base_url = %config.base_url, "Created catalog client");

        Ok(Self { config, client })
    }

    /// GET a URL, retrying transient failures, and decode the JSON body.
    async fn get_json(&self, operation: &str, url: &str) -> Result<Value> {
        let response = self
            .config
            .retry
            .run(operation, move |_| self.send(url), CatalogError::is_transient)
            .await
            .inspect_err(|e| error!(url = %url, error = %e, "Catalog request failed"))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(url = %url, status = %status, body = %body, "Catalog returned an error status");
            return Err(CatalogError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        let value = response.json::<Value>().await?;
        debug!(url = %url, "Catalog response received");
        Ok(value)
    }

    async fn send(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .basic_auth(&self.config.user, Some(&self.config.password))
            .send()
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl CatalogFetcher for CatalogClient {
    #[instrument(skip(self), fields(record_id = %id))]
    async fn get_record(&self, id: &RecordId) -> Result<CatalogRecord> {
        let url = self.config.record_url(id);
        let value = self.get_json("get_record", &url).await?;
        Ok(CatalogRecord::from_value(value)?)
    }

    #[instrument(skip(self))]
    async fn list_latest_records(&self) -> Result<Vec<CatalogRecord>> {
        let url = self.config.latest_records_url();
        let value = self.get_json("list_latest_records", &url).await?;
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(CatalogError::InvalidResponse(format!(
                    "expected a list of records, got {}",
                    json_kind(&other)
                )))
            }
        };

        let records = items
            .into_iter()
            .map(CatalogRecord::from_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        info!(count = records.len(), "Fetched latest catalog records");
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn list_latest_identifiers(&self) -> Result<Vec<RecordId>> {
        let url = self.config.latest_identifiers_url();
        let value = self.get_json("list_latest_identifiers", &url).await?;
        let ids: Vec<String> = serde_json::from_value(value)
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;
        Ok(ids.into_iter().map(RecordId::from).collect())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Configuration for the catalog data source.
///
/// Use this to explicitly choose between mock and live clients, following the
/// same pattern as the index provider selection.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// Serve the given records from memory.
    Mock(Vec<Value>),

    /// Talk to the catalog API.
    Live(CatalogConfig),
}

impl CatalogSource {
    pub fn mock(records: Vec<Value>) -> Self {
        Self::Mock(records)
    }

    pub fn live(config: CatalogConfig) -> Self {
        Self::Live(config)
    }

    /// Create the matching [`CatalogFetcher`] implementation.
    pub fn into_fetcher(self) -> Result<Arc<dyn CatalogFetcher>> {
        match self {
            Self::Mock(records) => Ok(Arc::new(MockCatalogClient::with_records(records)?)),
            Self::Live(config) => Ok(Arc::new(CatalogClient::new(config)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> CatalogConfig {
        CatalogConfig::new(format!("{}/rest/datasets", server.uri()), "user", "secret")
            .with_retry(RetryPolicy::fixed(3, Duration::from_millis(1)))
    }

    #[test]
    fn test_urls_from_host() {
        let config = CatalogConfig::from_host("metax.example.org", "u", "p");
        assert_eq!(config.base_url, "https://metax.example.org/rest/datasets");
        assert_eq!(
            config.record_url(&RecordId::new("cr-1")),
            "https://metax.example.org/rest/datasets/cr-1"
        );
        assert_eq!(
            config.latest_records_url(),
            "https://metax.example.org/rest/datasets?no_pagination=true&latest"
        );
        assert_eq!(
            config.latest_identifiers_url(),
            "https://metax.example.org/rest/datasets/identifiers?latest"
        );
    }

    #[tokio::test]
    async fn test_get_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/datasets/cr-1"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "identifier": "cr-1",
                "state": "published"
            })))
            .mount(&server)
            .await;

        let client = CatalogClient::new(test_config(&server)).unwrap();
        let record = client.get_record(&RecordId::new("cr-1")).await.unwrap();

        assert_eq!(record.identifier(), Some("cr-1"));
        assert!(record.is_published());
    }

    #[tokio::test]
    async fn test_get_record_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/datasets/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = CatalogClient::new(test_config(&server)).unwrap();
        let result = client.get_record(&RecordId::new("missing")).await;

        assert!(matches!(result, Err(CatalogError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_latest_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/datasets"))
            .and(query_param("no_pagination", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "identifier": "cr-1" },
                { "identifier": "cr-2" }
            ])))
            .mount(&server)
            .await;

        let client = CatalogClient::new(test_config(&server)).unwrap();
        let records = client.list_latest_records().await.unwrap();

        let ids: Vec<_> = records.iter().filter_map(|r| r.identifier()).collect();
        assert_eq!(ids, vec!["cr-1", "cr-2"]);
    }

    #[tokio::test]
    async fn test_list_latest_records_rejects_non_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/datasets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 0 })))
            .mount(&server)
            .await;

        let client = CatalogClient::new(test_config(&server)).unwrap();
        let result = client.list_latest_records().await;

        assert!(matches!(result, Err(CatalogError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_server_error_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/datasets/identifiers"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = CatalogClient::new(test_config(&server)).unwrap();
        let result = client.list_latest_identifiers().await;

        match result {
            Err(CatalogError::Status { status, body, .. }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("Expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Nothing listens on port 9 locally.
        let config = CatalogConfig::new("http://127.0.0.1:9/rest/datasets", "u", "p")
            .with_retry(RetryPolicy::fixed(2, Duration::from_millis(1)));
        let client = CatalogClient::new(config).unwrap();

        let err = client.list_latest_identifiers().await.unwrap_err();
        assert!(err.is_transient());
    }
}
