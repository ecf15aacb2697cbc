//! In-memory catalog client for tests and local development.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use dataset_indexer_shared::{CatalogRecord, RecordId};
use serde_json::Value;

use crate::{CatalogError, CatalogFetcher, Result};

/// Catalog client backed by an in-memory map of records.
///
/// Records are keyed by identifier. Every stored record counts as a latest
/// version; tests model superseded versions through `next_dataset_version`.
pub struct MockCatalogClient {
    records: RwLock<BTreeMap<RecordId, CatalogRecord>>,
    unavailable: AtomicBool,
}

impl MockCatalogClient {
    /// Create an empty mock client.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Create a mock client holding the given raw records.
    pub fn with_records(records: Vec<Value>) -> Result<Self> {
        let client = Self::new();
        for value in records {
            client.insert_record(CatalogRecord::from_value(value)?)?;
        }
        Ok(client)
    }

    /// Store or replace a record.
    pub fn insert_record(&self, record: CatalogRecord) -> Result<()> {
        let id = record.record_ref()?.id;
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, record);
        Ok(())
    }

    /// Remove a record, returning it if it was stored.
    pub fn remove_record(&self, id: &RecordId) -> Option<CatalogRecord> {
        self.records.write().unwrap_or_else(PoisonError::into_inner).remove(id)
    }

    /// Make every call fail with a transient error, as if the API were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("mock catalog is offline".to_string()));
        }
        Ok(())
    }
}

impl Default for MockCatalogClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogFetcher for MockCatalogClient {
    async fn get_record(&self, id: &RecordId) -> Result<CatalogRecord> {
        self.check_available()?;
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    async fn list_latest_records(&self) -> Result<Vec<CatalogRecord>> {
        self.check_available()?;
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.values().cloned().collect())
    }

    async fn list_latest_identifiers(&self) -> Result<Vec<RecordId>> {
        self.check_available()?;
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.keys().cloned().collect())
    }
}
