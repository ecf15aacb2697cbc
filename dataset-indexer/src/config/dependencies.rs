//! Dependency initialization and wiring for the dataset indexer.

use std::sync::Arc;

use catalog_client::{CatalogFetcher, CatalogSource};
use dataset_indexer_repository::opensearch::IndexConfig;
use dataset_indexer_repository::{
    IndexStore, IndexStoreConfig, OpenSearchProvider, SearchIndexError, SearchIndexProvider,
};
use dataset_indexer_shared::RetryPolicy;
use serde_json::Value;
use tracing::info;

use crate::config::settings::{CatalogSettings, Settings};
use crate::consumer::{AmqpConsumer, EventHandler};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::processor::{DatasetTransformer, RecordTransformer};
use crate::reconciler::ReconciliationEngine;
use crate::IndexingError;

/// Container for the initialized shared components.
///
/// The index store is connected eagerly; the catalog client and the broker
/// consumer are built on demand because only some commands need them.
pub struct Dependencies {
    pub settings: Settings,
    pub store: Arc<IndexStore>,
    pub transformer: Arc<dyn RecordTransformer>,
}

impl Dependencies {
    /// Connect to OpenSearch and build the shared components.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(IndexingError)` - If OpenSearch is unreachable (only in fail-fast mode)
    pub async fn new(settings: Settings) -> Result<Self, IndexingError> {
        info!(
            opensearch_url = %settings.opensearch_url,
            index_name = %settings.index_name,
            connection_mode = ?settings.connection_mode,
            retry_interval_secs = settings.retry_interval.as_secs(),
            retry_attempts = settings.retry_attempts,
            bulk_chunk_size = settings.bulk_chunk_size,
            "Initializing dependencies"
        );

        let index_config =
            IndexConfig::new(settings.index_name.clone()).with_replicas(settings.index_replicas);
        let provider = Self::connect_to_opensearch(
            &settings.opensearch_url,
            index_config,
            &settings.opensearch_retry(),
        )
        .await?;

        info!("OpenSearch connection established");

        let store = IndexStore::with_config(
            Box::new(provider),
            IndexStoreConfig::with_bulk_chunk_size(settings.bulk_chunk_size),
        );

        Ok(Self {
            settings,
            store: Arc::new(store),
            transformer: Arc::new(DatasetTransformer::new()),
        })
    }

    /// Build the catalog client selected by the settings.
    pub fn catalog(&self) -> Result<Arc<dyn CatalogFetcher>, IndexingError> {
        let source = match &self.settings.catalog {
            CatalogSettings::Fixture(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    IndexingError::config(format!(
                        "Failed to read catalog fixture {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let records: Vec<Value> = serde_json::from_str(&content).map_err(|e| {
                    IndexingError::config(format!(
                        "Catalog fixture {} is not a list of records: {}",
                        path.display(),
                        e
                    ))
                })?;
                info!(path = %path.display(), records = records.len(), "Using catalog fixture");
                CatalogSource::mock(records)
            }
            live => match live.live_config()? {
                Some(config) => {
                    info!(base_url = %config.base_url, "Using catalog API");
                    CatalogSource::live(config)
                }
                None => return Err(IndexingError::config("No catalog source configured")),
            },
        };

        source
            .into_fetcher()
            .map_err(|e| IndexingError::config(format!("Failed to create catalog client: {}", e)))
    }

    /// Build a reconciliation engine over the index store.
    pub fn reconciliation_engine(&self) -> Result<ReconciliationEngine, IndexingError> {
        Ok(ReconciliationEngine::new(
            self.catalog()?,
            Arc::clone(&self.store),
            Arc::clone(&self.transformer),
            self.settings.rules.clone(),
        ))
    }

    /// Build the event consumer loop.
    pub fn orchestrator(&self) -> Result<Orchestrator, IndexingError> {
        let amqp = self.settings.broker.amqp_settings()?;
        info!(
            hosts = ?amqp.hosts,
            exchange = %amqp.exchange,
            queue_suffix = ?amqp.queue_suffix,
            "Creating broker consumer"
        );
        let consumer = AmqpConsumer::new(amqp)
            .map_err(|e| IndexingError::config(format!("Failed to create consumer: {}", e)))?;

        let handler = EventHandler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.transformer),
            self.settings.rules.clone(),
        );
        let config = OrchestratorConfig {
            grace_period: self.settings.grace_period,
            ..OrchestratorConfig::default()
        };

        Ok(Orchestrator::with_config(Box::new(consumer), handler, config))
    }

    /// Connect to OpenSearch, probing the cluster until it answers or the
    /// retry policy gives up.
    async fn connect_to_opensearch(
        url: &str,
        index_config: IndexConfig,
        retry: &RetryPolicy,
    ) -> Result<OpenSearchProvider, IndexingError> {
        let provider = OpenSearchProvider::new(url, index_config)
            .await
            .map_err(|e| {
                IndexingError::config(format!("Failed to create OpenSearch provider: {}", e))
            })?;

        retry
            .run(
                "opensearch_connect",
                |_| provider.index_exists(),
                SearchIndexError::is_transient,
            )
            .await
            .map_err(|e| {
                IndexingError::config(format!("Failed to connect to OpenSearch at {}: {}", url, e))
            })?;

        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unreachable_opensearch_gives_up() {
        // Nothing listens on port 1.
        let retry = RetryPolicy::fixed(2, Duration::from_millis(1));
        let result = Dependencies::connect_to_opensearch(
            "http://127.0.0.1:1",
            IndexConfig::new("datasets-test".to_string()),
            &retry,
        )
        .await;

        assert!(matches!(result, Err(IndexingError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_invalid_opensearch_url_is_not_retried() {
        let retry = RetryPolicy::fixed(3000, Duration::from_secs(30));
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            Dependencies::connect_to_opensearch(
                "not a url",
                IndexConfig::new("datasets-test".to_string()),
                &retry,
            ),
        )
        .await;

        assert!(matches!(result, Ok(Err(IndexingError::ConfigError(_)))));
    }
}
