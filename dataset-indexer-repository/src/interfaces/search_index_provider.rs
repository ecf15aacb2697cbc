//! Search index provider trait definition.
//!
//! This module defines the abstract interface for search index operations,
//! allowing for different backend implementations (OpenSearch, Elasticsearch,
//! in-memory).

use std::collections::HashSet;

use async_trait::async_trait;
use dataset_indexer_shared::{IndexDocument, RecordId};

use crate::errors::SearchIndexError;
use crate::types::{BatchOperationSummary, BulkOperation};

/// Abstracts the underlying search index implementation.
///
/// A provider is bound to exactly one index. Implementations are injected into
/// `IndexStore` to enable dependency injection and easy testing with the
/// in-memory provider.
///
/// All methods return `Result<T, SearchIndexError>`; callers use
/// [`SearchIndexError::is_transient`] to decide between retrying and giving up.
#[async_trait]
pub trait SearchIndexProvider: Send + Sync {
    /// Name of the index this provider writes to.
    fn index_name(&self) -> &str;

    /// Check whether the index exists.
    async fn index_exists(&self) -> Result<bool, SearchIndexError>;

    /// Create the index with its settings and mappings.
    ///
    /// Creating an index that already exists is not an error.
    async fn create_index(&self) -> Result<(), SearchIndexError>;

    /// Delete the index.
    ///
    /// Deleting an index that does not exist is not an error.
    async fn delete_index(&self) -> Result<(), SearchIndexError>;

    /// Read the ids of every document in the index.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(ids))` - The ids of all documents
    /// * `Ok(None)` - If the index does not exist
    /// * `Err(SearchIndexError)` - If the read fails
    async fn list_document_ids(&self) -> Result<Option<HashSet<RecordId>>, SearchIndexError>;

    /// Check whether a document exists.
    async fn document_exists(&self, id: &RecordId) -> Result<bool, SearchIndexError>;

    /// Index a document, replacing any previous version with the same id.
    async fn upsert_document(&self, document: &IndexDocument) -> Result<(), SearchIndexError>;

    /// Delete a document.
    ///
    /// If the document doesn't exist, the operation is considered successful.
    async fn delete_document(&self, id: &RecordId) -> Result<(), SearchIndexError>;

    /// Send operations in a single bulk request.
    ///
    /// # Returns
    ///
    /// * `Ok(BatchOperationSummary)` - Per-operation outcome; individual items may have failed
    /// * `Err(SearchIndexError)` - If the request as a whole was rejected
    async fn bulk(
        &self,
        operations: &[BulkOperation],
    ) -> Result<BatchOperationSummary, SearchIndexError>;
}

/// Lets callers hand a shared provider to `IndexStore` and keep a handle to it.
#[async_trait]
impl<T: SearchIndexProvider + ?Sized> SearchIndexProvider for std::sync::Arc<T> {
    fn index_name(&self) -> &str {
        (**self).index_name()
    }

    async fn index_exists(&self) -> Result<bool, SearchIndexError> {
        (**self).index_exists().await
    }

    async fn create_index(&self) -> Result<(), SearchIndexError> {
        (**self).create_index().await
    }

    async fn delete_index(&self) -> Result<(), SearchIndexError> {
        (**self).delete_index().await
    }

    async fn list_document_ids(&self) -> Result<Option<HashSet<RecordId>>, SearchIndexError> {
        (**self).list_document_ids().await
    }

    async fn document_exists(&self, id: &RecordId) -> Result<bool, SearchIndexError> {
        (**self).document_exists(id).await
    }

    async fn upsert_document(&self, document: &IndexDocument) -> Result<(), SearchIndexError> {
        (**self).upsert_document(document).await
    }

    async fn delete_document(&self, id: &RecordId) -> Result<(), SearchIndexError> {
        (**self).delete_document(id).await
    }

    async fn bulk(
        &self,
        operations: &[BulkOperation],
    ) -> Result<BatchOperationSummary, SearchIndexError> {
        (**self).bulk(operations).await
    }
}
