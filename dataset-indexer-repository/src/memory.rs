//! In-memory search index provider.
//!
//! Keeps documents in a map and records every bulk request, so tests can
//! assert on how writes were batched. Failures and latency can be injected.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dataset_indexer_shared::{IndexDocument, RecordId};
use serde_json::Value;

use crate::errors::SearchIndexError;
use crate::interfaces::SearchIndexProvider;
use crate::opensearch::INDEX_NAME;
use crate::types::{BatchOperationResult, BatchOperationSummary, BulkOperation};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Search index provider backed by process memory.
pub struct InMemoryProvider {
    index_present: AtomicBool,
    documents: Mutex<BTreeMap<RecordId, Value>>,
    bulk_requests: Mutex<Vec<Vec<BulkOperation>>>,
    write_failure: Mutex<Option<SearchIndexError>>,
    index_failure: Mutex<Option<SearchIndexError>>,
    failing_bulk_requests: Mutex<HashSet<usize>>,
    write_delay: Mutex<Option<Duration>>,
}

impl InMemoryProvider {
    /// Create a provider whose index does not exist yet.
    pub fn new() -> Self {
        Self {
            index_present: AtomicBool::new(false),
            documents: Mutex::new(BTreeMap::new()),
            bulk_requests: Mutex::new(Vec::new()),
            write_failure: Mutex::new(None),
            index_failure: Mutex::new(None),
            failing_bulk_requests: Mutex::new(HashSet::new()),
            write_delay: Mutex::new(None),
        }
    }

    /// Create a provider whose index exists and holds the given documents.
    pub fn with_documents(documents: impl IntoIterator<Item = IndexDocument>) -> Self {
        let provider = Self::new();
        provider.index_present.store(true, Ordering::SeqCst);
        {
            let mut stored = lock(&provider.documents);
            for document in documents {
                stored.insert(document.id, document.body);
            }
        }
        provider
    }

    /// Make every document write and delete fail with `error`.
    pub fn set_write_failure(&self, error: Option<SearchIndexError>) {
        *lock(&self.write_failure) = error;
    }

    /// Make index existence checks and creation fail with `error`.
    pub fn set_index_failure(&self, error: Option<SearchIndexError>) {
        *lock(&self.index_failure) = error;
    }

    /// Reject the bulk request with the given 0-based sequence number.
    pub fn fail_bulk_request(&self, request: usize) {
        lock(&self.failing_bulk_requests).insert(request);
    }

    /// Sleep before every document write or delete.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *lock(&self.write_delay) = delay;
    }

    /// Ids of the stored documents, in order.
    pub fn document_ids(&self) -> Vec<RecordId> {
        lock(&self.documents).keys().cloned().collect()
    }

    /// The stored body of a document.
    pub fn document(&self, id: &str) -> Option<Value> {
        lock(&self.documents).get(&RecordId::new(id)).cloned()
    }

    /// Every bulk request received so far.
    pub fn bulk_requests(&self) -> Vec<Vec<BulkOperation>> {
        lock(&self.bulk_requests).clone()
    }

    pub fn is_index_present(&self) -> bool {
        self.index_present.load(Ordering::SeqCst)
    }

    fn check_index(&self) -> Result<(), SearchIndexError> {
        match lock(&self.index_failure).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn before_write(&self) -> Result<(), SearchIndexError> {
        let delay = *lock(&self.write_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = lock(&self.write_failure).clone() {
            return Err(error);
        }
        if !self.is_index_present() {
            return Err(SearchIndexError::index_not_found(INDEX_NAME));
        }
        Ok(())
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchIndexProvider for InMemoryProvider {
    fn index_name(&self) -> &str {
        INDEX_NAME
    }

    async fn index_exists(&self) -> Result<bool, SearchIndexError> {
        self.check_index()?;
        Ok(self.is_index_present())
    }

    async fn create_index(&self) -> Result<(), SearchIndexError> {
        self.check_index()?;
        self.index_present.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_index(&self) -> Result<(), SearchIndexError> {
        self.check_index()?;
        self.index_present.store(false, Ordering::SeqCst);
        lock(&self.documents).clear();
        Ok(())
    }

    async fn list_document_ids(&self) -> Result<Option<HashSet<RecordId>>, SearchIndexError> {
        self.check_index()?;
        if !self.is_index_present() {
            return Ok(None);
        }
        Ok(Some(lock(&self.documents).keys().cloned().collect()))
    }

    async fn document_exists(&self, id: &RecordId) -> Result<bool, SearchIndexError> {
        self.check_index()?;
        Ok(lock(&self.documents).contains_key(id))
    }

    async fn upsert_document(&self, document: &IndexDocument) -> Result<(), SearchIndexError> {
        self.before_write().await?;
        lock(&self.documents).insert(document.id.clone(), document.body.clone());
        Ok(())
    }

    async fn delete_document(&self, id: &RecordId) -> Result<(), SearchIndexError> {
        self.before_write().await?;
        lock(&self.documents).remove(id);
        Ok(())
    }

    async fn bulk(
        &self,
        operations: &[BulkOperation],
    ) -> Result<BatchOperationSummary, SearchIndexError> {
        let sequence = {
            let mut requests = lock(&self.bulk_requests);
            requests.push(operations.to_vec());
            requests.len() - 1
        };

        if lock(&self.failing_bulk_requests).contains(&sequence) {
            return Err(SearchIndexError::bulk_index(format!(
                "bulk request {} rejected",
                sequence
            )));
        }
        self.before_write().await?;

        let mut documents = lock(&self.documents);
        let results = operations
            .iter()
            .map(|operation| {
                match operation {
                    BulkOperation::Upsert(document) => {
                        documents.insert(document.id.clone(), document.body.clone());
                    }
                    BulkOperation::Delete(id) => {
                        documents.remove(id);
                    }
                }
                BatchOperationResult {
                    id: operation.id().clone(),
                    action: operation.action(),
                    success: true,
                    error: None,
                }
            })
            .collect();

        Ok(BatchOperationSummary::from_results(results))
    }
}
