//! Index store implementation.
//!
//! This module provides the main service for interacting with the search index.
//! Both synchronization paths go through it: the event consumer writes single
//! documents, reconciliation writes in bulk.

use std::collections::HashSet;

use dataset_indexer_shared::{IndexDocument, RecordId};
use tracing::{debug, error, info, instrument, warn};

use crate::config::IndexStoreConfig;
use crate::errors::SearchIndexError;
use crate::interfaces::SearchIndexProvider;
use crate::types::{bulk_payload, BulkOperation};
use crate::utils::validate_document_id;

/// The main service for interacting with the search index.
///
/// Index lifecycle operations report success as a boolean and log the cause
/// of a failure; document operations return `SearchIndexError` so callers can
/// tell transient from permanent failures.
///
/// # Example
///
/// ```no_run
/// use dataset_indexer_repository::IndexStore;
/// use dataset_indexer_repository::opensearch::{IndexConfig, OpenSearchProvider};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = Box::new(OpenSearchProvider::new("http://localhost:9200", IndexConfig::default()).await?);
/// let store = IndexStore::new(provider);
///
/// if store.ensure_exists().await {
///     let ids = store.list_all_ids().await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct IndexStore {
    provider: Box<dyn SearchIndexProvider>,
    config: IndexStoreConfig,
}

impl IndexStore {
    /// Create a new IndexStore with default configuration.
    ///
    /// # Arguments
    ///
    /// * `provider` - A boxed implementation of `SearchIndexProvider` (e.g., `OpenSearchProvider`)
    pub fn new(provider: Box<dyn SearchIndexProvider>) -> Self {
        Self::with_config(provider, IndexStoreConfig::default())
    }

    /// Create a new IndexStore with custom configuration.
    pub fn with_config(provider: Box<dyn SearchIndexProvider>, config: IndexStoreConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &IndexStoreConfig {
        &self.config
    }

    pub fn index_name(&self) -> &str {
        self.provider.index_name()
    }

    /// Create the index with its mappings unless it already exists.
    ///
    /// # Returns
    ///
    /// `true` if the index exists afterwards, `false` if it could not be
    /// checked or created.
    #[instrument(skip(self), fields(index = %self.index_name()))]
    pub async fn ensure_exists(&self) -> bool {
        match self.provider.index_exists().await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "Unable to check if index exists");
                return false;
            }
        }

        match self.provider.create_index().await {
            Ok(()) => {
                info!("Created index");
                true
            }
            Err(e) => {
                error!(error = %e, "Unable to create index");
                false
            }
        }
    }

    /// Delete the index. An absent index counts as deleted.
    #[instrument(skip(self), fields(index = %self.index_name()))]
    pub async fn delete_index(&self) -> bool {
        match self.provider.delete_index().await {
            Ok(()) => {
                info!("Deleted index");
                true
            }
            Err(e) => {
                error!(error = %e, "Unable to delete index");
                false
            }
        }
    }

    /// Ids of every document in the index, or `None` if the index does not exist.
    pub async fn list_all_ids(&self) -> Result<Option<HashSet<RecordId>>, SearchIndexError> {
        self.provider.list_document_ids().await
    }

    /// Whether a document exists.
    pub async fn exists(&self, id: &RecordId) -> Result<bool, SearchIndexError> {
        self.provider.document_exists(id).await
    }

    /// Index a document, replacing any previous version.
    pub async fn upsert(&self, document: &IndexDocument) -> Result<(), SearchIndexError> {
        validate_document_id(&document.id)?;
        self.provider.upsert_document(document).await?;
        debug!(doc_id = %document.id, "Document upserted");
        Ok(())
    }

    /// Remove a document if it exists.
    ///
    /// Absent documents are skipped without a delete request.
    pub async fn remove(&self, id: &RecordId) -> Result<(), SearchIndexError> {
        validate_document_id(id)?;
        if !self.exists(id).await? {
            debug!(doc_id = %id, "Document not in index, nothing to remove");
            return Ok(());
        }
        self.provider.delete_document(id).await?;
        debug!(doc_id = %id, "Document removed");
        Ok(())
    }

    /// Apply upserts and deletes in bulk requests of at most
    /// `bulk_chunk_size` operations.
    ///
    /// Upserts are sent before deletes. A failed chunk is logged with its
    /// payload and does not stop later chunks.
    ///
    /// # Returns
    ///
    /// `true` if every chunk succeeded.
    #[instrument(skip_all, fields(upserts = upserts.len(), deletes = deletes.len()))]
    pub async fn bulk_apply(&self, upserts: Vec<IndexDocument>, deletes: Vec<RecordId>) -> bool {
        let operations: Vec<BulkOperation> = upserts
            .into_iter()
            .map(BulkOperation::Upsert)
            .chain(deletes.into_iter().map(BulkOperation::Delete))
            .collect();

        if operations.is_empty() {
            debug!("Nothing to apply");
            return true;
        }

        let chunk_size = self.config.bulk_chunk_size.max(1);
        let chunk_count = operations.len().div_ceil(chunk_size);
        let mut all_succeeded = true;

        for (chunk_index, chunk) in operations.chunks(chunk_size).enumerate() {
            match self.provider.bulk(chunk).await {
                Ok(summary) if summary.is_success() => {
                    debug!(
                        chunk = chunk_index + 1,
                        chunks = chunk_count,
                        operations = summary.total,
                        "Bulk chunk applied"
                    );
                }
                Ok(summary) => {
                    all_succeeded = false;
                    for failure in summary.failures() {
                        warn!(
                            doc_id = %failure.id,
                            action = failure.action,
                            error = ?failure.error,
                            "Bulk operation failed"
                        );
                    }
                    error!(
                        chunk = chunk_index + 1,
                        chunks = chunk_count,
                        failed = summary.failed,
                        payload = %bulk_payload(chunk),
                        "Bulk chunk had failures"
                    );
                }
                Err(e) => {
                    all_succeeded = false;
                    error!(
                        chunk = chunk_index + 1,
                        chunks = chunk_count,
                        error = %e,
                        payload = %bulk_payload(chunk),
                        "Bulk chunk failed"
                    );
                }
            }
        }

        info!(
            operations = operations.len(),
            chunks = chunk_count,
            success = all_succeeded,
            "Bulk apply finished"
        );
        all_succeeded
    }
}
