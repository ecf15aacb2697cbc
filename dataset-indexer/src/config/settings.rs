//! Typed settings read from environment variables.
//!
//! Every optional value has a default. Invalid values are logged and replaced
//! by the default; missing credentials are reported when the component that
//! needs them is built.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use catalog_client::{CatalogConfig, DEFAULT_TIMEOUT_SECS};
use dataset_indexer_repository::opensearch::INDEX_NAME;
use dataset_indexer_repository::DEFAULT_BULK_CHUNK_SIZE;
use dataset_indexer_shared::eligibility::LEGACY_CATALOG;
use dataset_indexer_shared::{EligibilityRules, RetryPolicy};
use tracing::warn;
use uuid::Uuid;

use crate::consumer::{AmqpSettings, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::orchestrator::DEFAULT_GRACE_PERIOD;
use crate::IndexingError;

/// Default OpenSearch URL.
const DEFAULT_OPENSEARCH_URL: &str = "http://localhost:9200";

/// Default connection retry interval in seconds.
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 15;

/// Default OpenSearch connection attempts in retry mode (one hour at the
/// default interval).
const DEFAULT_OPENSEARCH_RETRY_ATTEMPTS: u32 = 240;

/// Default exchange the catalog publishes record events to.
const DEFAULT_EXCHANGE: &str = "datasets";

/// Queue suffix value that asks for a generated suffix.
const RANDOM_QUEUE_SUFFIX: &str = "random";

/// Connection mode for OpenSearch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Fail immediately if connection fails.
    FailFast,
    /// Retry connection at a fixed interval, up to a bounded number of attempts.
    Retry,
}

impl ConnectionMode {
    /// Parse the connection mode.
    ///
    /// Valid values: "fail-fast" or "retry" (case-insensitive).
    /// Defaults to "retry" if not set or invalid.
    fn parse(value: Option<String>) -> Self {
        match value
            .unwrap_or_else(|| "retry".to_string())
            .to_lowercase()
            .as_str()
        {
            "fail-fast" | "failfast" | "fail_fast" => Self::FailFast,
            "retry" => Self::Retry,
            _ => {
                warn!("Invalid OPENSEARCH_CONNECTION_MODE, defaulting to 'retry'");
                Self::Retry
            }
        }
    }
}

/// Where catalog records come from.
#[derive(Debug, Clone)]
pub enum CatalogSettings {
    /// Records are read from a JSON file holding a list of records.
    Fixture(PathBuf),
    /// The catalog REST API.
    Live {
        host: Option<String>,
        user: Option<String>,
        password: Option<String>,
        verify_ssl: bool,
        timeout: Duration,
    },
}

impl CatalogSettings {
    /// Client configuration for the live API.
    pub fn live_config(&self) -> Result<Option<CatalogConfig>, IndexingError> {
        let Self::Live {
            host,
            user,
            password,
            verify_ssl,
            timeout,
        } = self
        else {
            return Ok(None);
        };

        let host = required("METAX_HOST", host)?;
        let user = required("METAX_USER", user)?;
        let password = required("METAX_PASSWORD", password)?;
        Ok(Some(
            CatalogConfig::from_host(host, user, password)
                .with_verify_ssl(*verify_ssl)
                .with_timeout(*timeout),
        ))
    }
}

/// Broker settings as read, before credentials are checked.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub hosts: Vec<String>,
    pub port: u16,
    pub vhost: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub exchange: String,
    pub queue_suffix: Option<String>,
    pub queue_expiry: Option<Duration>,
    pub retry: RetryPolicy,
}

impl BrokerSettings {
    /// Consumer settings, failing when hosts or credentials are missing.
    pub fn amqp_settings(&self) -> Result<AmqpSettings, IndexingError> {
        if self.hosts.is_empty() {
            return Err(IndexingError::config("RABBITMQ_HOSTS is not set"));
        }
        let user = required("RABBITMQ_USER", &self.user)?;
        let password = required("RABBITMQ_PASSWORD", &self.password)?;

        let mut settings =
            AmqpSettings::new(self.hosts.clone(), user, password, self.exchange.clone());
        settings.port = self.port;
        settings.vhost = self.vhost.clone();
        settings.retry = self.retry.clone();
        if let Some(expiry) = self.queue_expiry {
            settings = settings.with_queue_expiry(expiry);
        }
        if let Some(suffix) = &self.queue_suffix {
            settings = settings.with_queue_suffix(suffix.clone());
        }
        Ok(settings)
    }
}

/// All runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub opensearch_url: String,
    pub index_name: String,
    pub index_replicas: u32,
    pub connection_mode: ConnectionMode,
    pub retry_interval: Duration,
    pub retry_attempts: u32,
    pub bulk_chunk_size: usize,
    pub catalog: CatalogSettings,
    pub broker: BrokerSettings,
    pub rules: EligibilityRules,
    pub grace_period: Duration,
}

impl Settings {
    /// Read settings from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `OPENSEARCH_URL`: OpenSearch server URL (default: http://localhost:9200)
    /// - `INDEX_NAME`: Index name (default: "metax")
    /// - `INDEX_REPLICAS`: Replica count for a created index (default: 1)
    /// - `OPENSEARCH_CONNECTION_MODE`: "fail-fast" or "retry" (default: retry)
    /// - `OPENSEARCH_RETRY_INTERVAL_SECS`: Retry interval in seconds (default: 15)
    /// - `OPENSEARCH_RETRY_ATTEMPTS`: Connection attempts in retry mode (default: 240)
    /// - `BULK_CHUNK_SIZE`: Operations per bulk request (default: 300)
    /// - `CATALOG_FIXTURE_PATH`: Serve catalog records from this JSON file
    ///   instead of the API
    /// - `METAX_HOST`, `METAX_USER`, `METAX_PASSWORD`: Catalog API access
    /// - `METAX_VERIFY_SSL`: Verify the catalog certificate (default: true)
    /// - `METAX_TIMEOUT_SECS`: Catalog request timeout (default: 1200)
    /// - `RABBITMQ_HOSTS`: Comma separated broker hosts
    /// - `RABBITMQ_PORT` (default: 5672), `RABBITMQ_VHOST` (default: "/")
    /// - `RABBITMQ_USER`, `RABBITMQ_PASSWORD`: Broker credentials
    /// - `RABBITMQ_EXCHANGE`: Exchange to bind to (default: "datasets")
    /// - `RABBITMQ_QUEUE_SUFFIX`: Queue name suffix; "random" generates one
    /// - `RABBITMQ_QUEUE_EXPIRES_MS`: Queue expiry (default with a suffix: 8 h)
    /// - `RABBITMQ_RETRY_ATTEMPTS` (default: 3000), `RABBITMQ_RETRY_DELAY_SECS`
    ///   (default: 30)
    /// - `EXCLUDED_CATALOGS`: Comma separated catalogs never indexed
    ///   (default: the legacy catalog)
    /// - `SHUTDOWN_GRACE_SECS`: In-flight message grace period (default: 10)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let catalog = match var("CATALOG_FIXTURE_PATH") {
            Some(path) => CatalogSettings::Fixture(PathBuf::from(path)),
            None => CatalogSettings::Live {
                host: var("METAX_HOST"),
                user: var("METAX_USER"),
                password: var("METAX_PASSWORD"),
                verify_ssl: parse_or(&var, "METAX_VERIFY_SSL", true),
                timeout: Duration::from_secs(parse_or(
                    &var,
                    "METAX_TIMEOUT_SECS",
                    DEFAULT_TIMEOUT_SECS,
                )),
            },
        };

        let queue_suffix = var("RABBITMQ_QUEUE_SUFFIX").map(|suffix| {
            if suffix == RANDOM_QUEUE_SUFFIX {
                Uuid::new_v4().simple().to_string()
            } else {
                suffix
            }
        });
        let broker = BrokerSettings {
            hosts: list(var("RABBITMQ_HOSTS")),
            port: parse_or(&var, "RABBITMQ_PORT", 5672),
            vhost: var("RABBITMQ_VHOST").unwrap_or_else(|| "/".to_string()),
            user: var("RABBITMQ_USER"),
            password: var("RABBITMQ_PASSWORD"),
            exchange: var("RABBITMQ_EXCHANGE").unwrap_or_else(|| DEFAULT_EXCHANGE.to_string()),
            queue_suffix,
            queue_expiry: parse_opt::<u64>(&var, "RABBITMQ_QUEUE_EXPIRES_MS")
                .map(Duration::from_millis),
            retry: RetryPolicy::fixed(
                parse_or(&var, "RABBITMQ_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS),
                Duration::from_secs(parse_or(
                    &var,
                    "RABBITMQ_RETRY_DELAY_SECS",
                    DEFAULT_RETRY_DELAY.as_secs(),
                )),
            ),
        };

        let mut rules = EligibilityRules::default();
        let excluded = list(var("EXCLUDED_CATALOGS"));
        rules.excluded_catalogs = if excluded.is_empty() {
            vec![LEGACY_CATALOG.to_string()]
        } else {
            excluded
        };

        Self {
            opensearch_url: var("OPENSEARCH_URL")
                .unwrap_or_else(|| DEFAULT_OPENSEARCH_URL.to_string()),
            index_name: var("INDEX_NAME").unwrap_or_else(|| INDEX_NAME.to_string()),
            index_replicas: parse_or(&var, "INDEX_REPLICAS", 1),
            connection_mode: ConnectionMode::parse(var("OPENSEARCH_CONNECTION_MODE")),
            retry_interval: Duration::from_secs(parse_or(
                &var,
                "OPENSEARCH_RETRY_INTERVAL_SECS",
                DEFAULT_RETRY_INTERVAL_SECS,
            )),
            retry_attempts: parse_or(
                &var,
                "OPENSEARCH_RETRY_ATTEMPTS",
                DEFAULT_OPENSEARCH_RETRY_ATTEMPTS,
            ),
            bulk_chunk_size: parse_or(&var, "BULK_CHUNK_SIZE", DEFAULT_BULK_CHUNK_SIZE),
            catalog,
            broker,
            rules,
            grace_period: Duration::from_secs(parse_or(
                &var,
                "SHUTDOWN_GRACE_SECS",
                DEFAULT_GRACE_PERIOD.as_secs(),
            )),
        }
    }
}

impl Settings {
    /// Backoff for the initial OpenSearch connection; fail-fast is one attempt.
    pub fn opensearch_retry(&self) -> RetryPolicy {
        match self.connection_mode {
            ConnectionMode::FailFast => RetryPolicy::fixed(1, self.retry_interval),
            ConnectionMode::Retry => RetryPolicy::fixed(self.retry_attempts, self.retry_interval),
        }
    }
}

fn required<'a>(key: &str, value: &'a Option<String>) -> Result<&'a str, IndexingError> {
    value
        .as_deref()
        .ok_or_else(|| IndexingError::config(format!("{} is not set", key)))
}

fn list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_opt<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Invalid value, ignoring");
            None
        }
    }
}

fn parse_or<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    let Some(raw) = var(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, "Invalid value, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]);

        assert_eq!(settings.opensearch_url, DEFAULT_OPENSEARCH_URL);
        assert_eq!(settings.index_name, "metax");
        assert_eq!(settings.connection_mode, ConnectionMode::Retry);
        assert_eq!(settings.bulk_chunk_size, 300);
        assert_eq!(settings.grace_period, Duration::from_secs(10));
        assert_eq!(settings.rules.excluded_catalogs, vec![LEGACY_CATALOG]);
        assert_eq!(settings.broker.port, 5672);
        assert_eq!(settings.broker.exchange, "datasets");
        assert_eq!(
            settings.broker.retry,
            RetryPolicy::fixed(3000, Duration::from_secs(30))
        );
        assert!(matches!(settings.catalog, CatalogSettings::Live { .. }));
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let settings = settings(&[
            ("OPENSEARCH_CONNECTION_MODE", "sometimes"),
            ("BULK_CHUNK_SIZE", "lots"),
            ("RABBITMQ_PORT", "-1"),
        ]);

        assert_eq!(settings.connection_mode, ConnectionMode::Retry);
        assert_eq!(settings.bulk_chunk_size, 300);
        assert_eq!(settings.broker.port, 5672);
    }

    #[test]
    fn test_opensearch_retry_is_bounded() {
        let retry = settings(&[]).opensearch_retry();
        assert_eq!(retry, RetryPolicy::fixed(240, Duration::from_secs(15)));

        let retry = settings(&[
            ("OPENSEARCH_RETRY_ATTEMPTS", "5"),
            ("OPENSEARCH_RETRY_INTERVAL_SECS", "2"),
        ])
        .opensearch_retry();
        assert_eq!(retry, RetryPolicy::fixed(5, Duration::from_secs(2)));

        let retry = settings(&[("OPENSEARCH_CONNECTION_MODE", "fail-fast")]).opensearch_retry();
        assert_eq!(retry.max_attempts, 1);
    }

    #[test]
    fn test_connection_mode_aliases() {
        for value in ["fail-fast", "FailFast", "fail_fast"] {
            assert_eq!(
                ConnectionMode::parse(Some(value.to_string())),
                ConnectionMode::FailFast
            );
        }
    }

    #[test]
    fn test_missing_broker_credentials() {
        let settings = settings(&[("RABBITMQ_HOSTS", "mq-1")]);
        let err = settings.broker.amqp_settings().unwrap_err();
        assert!(err.to_string().contains("RABBITMQ_USER"));

        let settings = settings_without_hosts();
        assert!(settings.broker.amqp_settings().is_err());
    }

    fn settings_without_hosts() -> Settings {
        settings(&[("RABBITMQ_USER", "u"), ("RABBITMQ_PASSWORD", "p")])
    }

    #[test]
    fn test_broker_settings() {
        let settings = settings(&[
            ("RABBITMQ_HOSTS", "mq-1, mq-2,,"),
            ("RABBITMQ_USER", "u"),
            ("RABBITMQ_PASSWORD", "p"),
            ("RABBITMQ_QUEUE_SUFFIX", "dev"),
        ]);
        let amqp = settings.broker.amqp_settings().unwrap();

        assert_eq!(amqp.hosts, vec!["mq-1", "mq-2"]);
        assert_eq!(amqp.queue_suffix.as_deref(), Some("dev"));
        assert_eq!(amqp.queue_expiry, Some(Duration::from_millis(28_800_000)));
    }

    #[test]
    fn test_random_queue_suffix() {
        let settings = settings(&[("RABBITMQ_QUEUE_SUFFIX", "random")]);
        let suffix = settings.broker.queue_suffix.unwrap();
        assert_eq!(suffix.len(), 32);
        assert_ne!(suffix, "random");
    }

    #[test]
    fn test_catalog_settings() {
        let settings = settings(&[("METAX_HOST", "metax.test")]);
        let err = settings.catalog.live_config().unwrap_err();
        assert!(err.to_string().contains("METAX_USER"));

        let settings = self::settings(&[
            ("METAX_HOST", "metax.test"),
            ("METAX_USER", "u"),
            ("METAX_PASSWORD", "p"),
            ("METAX_VERIFY_SSL", "false"),
        ]);
        let config = settings.catalog.live_config().unwrap().unwrap();
        assert_eq!(config.base_url, "https://metax.test/rest/datasets");
        assert!(!config.verify_ssl);

        let settings = self::settings(&[("CATALOG_FIXTURE_PATH", "records.json")]);
        assert!(settings.catalog.live_config().unwrap().is_none());
    }
}
