//! Full reconciliation of the search index against the catalog.
//!
//! A run fetches every latest catalog record, keeps the eligible ones and
//! rewrites the index so that it holds exactly those documents.

mod diff;

pub use diff::{compute_diff, Diff};

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use catalog_client::CatalogFetcher;
use chrono::{DateTime, Utc};
use dataset_indexer_repository::IndexStore;
use dataset_indexer_shared::{CatalogRecord, EligibilityRules, IndexDocument, RecordId};
use tracing::{debug, error, info, instrument, warn};

use crate::errors::ReconcileError;
use crate::orchestrator::ConsumerControl;
use crate::processor::RecordTransformer;

/// What happens to the index before the diff is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Diff against the current index contents.
    KeepIndex,
    /// Delete the index first and rebuild it from scratch.
    RecreateIndex,
}

impl fmt::Display for ReconcileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepIndex => f.write_str("keep_index"),
            Self::RecreateIndex => f.write_str("recreate_index"),
        }
    }
}

/// Outcome of a reconciliation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub mode: ReconcileMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Records returned by the catalog.
    pub fetched: usize,
    /// Records that passed the eligibility rules.
    pub wanted: usize,
    pub created: usize,
    pub updated: usize,
    /// Includes previous versions removed alongside their successors.
    pub deleted: usize,
    /// Records skipped because no document could be built.
    pub transform_failures: usize,
    /// Whether every bulk request succeeded.
    pub success: bool,
}

/// Outcome of loading sample records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub requested: usize,
    pub fetched: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub success: bool,
}

/// Drives full reconciliation runs.
pub struct ReconciliationEngine {
    catalog: Arc<dyn CatalogFetcher>,
    store: Arc<IndexStore>,
    transformer: Arc<dyn RecordTransformer>,
    rules: EligibilityRules,
    control: Option<ConsumerControl>,
}

impl ReconciliationEngine {
    pub fn new(
        catalog: Arc<dyn CatalogFetcher>,
        store: Arc<IndexStore>,
        transformer: Arc<dyn RecordTransformer>,
        rules: EligibilityRules,
    ) -> Self {
        Self {
            catalog,
            store,
            transformer,
            rules,
            control: None,
        }
    }

    /// Pause the given consumer for the duration of every run.
    pub fn with_consumer_control(mut self, control: ConsumerControl) -> Self {
        self.control = Some(control);
        self
    }

    /// Bring the index in line with the catalog.
    ///
    /// An attached consumer is paused for the whole run and resumed
    /// afterwards, also when the run fails.
    #[instrument(skip(self), fields(index = %self.store.index_name()))]
    pub async fn reconcile(&self, mode: ReconcileMode) -> Result<ReconcileReport, ReconcileError> {
        let _pause = match &self.control {
            Some(control) => {
                info!("Pausing event consumer for reconciliation");
                Some(control.pause().await)
            }
            None => None,
        };

        let result = self.run(mode).await;
        match &result {
            Ok(report) => info!(
                fetched = report.fetched,
                wanted = report.wanted,
                created = report.created,
                updated = report.updated,
                deleted = report.deleted,
                transform_failures = report.transform_failures,
                success = report.success,
                "Reconciliation finished"
            ),
            Err(e) => error!(error = %e, "Reconciliation aborted"),
        }
        result
    }

    async fn run(&self, mode: ReconcileMode) -> Result<ReconcileReport, ReconcileError> {
        let started_at = Utc::now();

        let records = self.catalog.list_latest_records().await?;
        let fetched = records.len();
        let wanted = self.eligible(records);
        info!(fetched, wanted = wanted.len(), "Fetched catalog records");

        if mode == ReconcileMode::RecreateIndex && !self.store.delete_index().await {
            return Err(ReconcileError::IndexDeletion(
                self.store.index_name().to_string(),
            ));
        }
        if !self.store.ensure_exists().await {
            return Err(ReconcileError::IndexCreation(
                self.store.index_name().to_string(),
            ));
        }

        let existing = self.store.list_all_ids().await?.unwrap_or_default();
        let wanted_ids: HashSet<RecordId> = wanted.keys().cloned().collect();
        let mut diff = compute_diff(&existing, &wanted_ids);
        debug!(
            existing = existing.len(),
            to_create = diff.to_create.len(),
            to_update = diff.to_update.len(),
            to_delete = diff.to_delete.len(),
            "Computed index diff"
        );

        let mut upserts = Vec::with_capacity(diff.to_create.len() + diff.to_update.len());
        let mut previous_versions = Vec::new();
        let mut transform_failures = 0;

        for id in diff.to_write() {
            let Some(record) = wanted.get(id) else {
                continue;
            };
            match self.transformer.transform(record) {
                Ok(document) => upserts.push(document),
                Err(e) => {
                    warn!(record_id = %id, error = %e, "Unable to build document, skipping record");
                    transform_failures += 1;
                    continue;
                }
            }
            if let Some(previous) = record.previous_version_identifier() {
                previous_versions.push(RecordId::from(previous));
            }
        }

        for previous in previous_versions {
            if !wanted_ids.contains(&previous) && diff.to_delete.insert(previous.clone()) {
                debug!(previous_id = %previous, "Removing superseded version");
            }
        }

        let success = self.apply(upserts, &diff).await;

        Ok(ReconcileReport {
            mode,
            started_at,
            finished_at: Utc::now(),
            fetched,
            wanted: wanted_ids.len(),
            created: diff.to_create.len(),
            updated: diff.to_update.len(),
            deleted: diff.to_delete.len(),
            transform_failures,
            success,
        })
    }

    async fn apply(&self, upserts: Vec<IndexDocument>, diff: &Diff) -> bool {
        let deletes: Vec<RecordId> = diff.to_delete.iter().cloned().collect();
        self.store.bulk_apply(upserts, deletes).await
    }

    /// Keep the records that belong in the index, keyed by id.
    fn eligible(&self, records: Vec<CatalogRecord>) -> BTreeMap<RecordId, CatalogRecord> {
        let mut wanted = BTreeMap::new();
        for record in records {
            let reference = match record.record_ref() {
                Ok(reference) => reference,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable catalog record");
                    continue;
                }
            };
            match self.rules.check(&reference) {
                Ok(()) => {
                    wanted.insert(reference.id, record);
                }
                Err(exclusion) => {
                    debug!(record_id = %reference.id, reason = %exclusion, "Record not eligible");
                }
            }
        }
        wanted
    }

    /// Index the first `count` latest records, fetched one at a time.
    ///
    /// Meant for seeding development indexes; the index is not diffed.
    #[instrument(skip(self), fields(index = %self.store.index_name()))]
    pub async fn load_test_data(&self, count: usize) -> Result<LoadReport, ReconcileError> {
        if !self.store.ensure_exists().await {
            return Err(ReconcileError::IndexCreation(
                self.store.index_name().to_string(),
            ));
        }

        let identifiers = self.catalog.list_latest_identifiers().await?;
        let mut report = LoadReport {
            requested: count,
            fetched: 0,
            indexed: 0,
            skipped: 0,
            success: true,
        };
        let mut documents = Vec::new();

        for id in identifiers.into_iter().take(count) {
            let record = match self.catalog.get_record(&id).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(record_id = %id, error = %e, "Unable to fetch record, skipping");
                    report.skipped += 1;
                    continue;
                }
            };
            report.fetched += 1;

            let eligible = record
                .record_ref()
                .map(|reference| self.rules.is_eligible(&reference))
                .unwrap_or(false);
            if !eligible {
                debug!(record_id = %id, "Record not eligible, skipping");
                report.skipped += 1;
                continue;
            }

            match self.transformer.transform(&record) {
                Ok(document) => documents.push(document),
                Err(e) => {
                    warn!(record_id = %id, error = %e, "Unable to build document, skipping");
                    report.skipped += 1;
                }
            }
        }

        report.indexed = documents.len();
        report.success = self.store.bulk_apply(documents, Vec::new()).await;
        info!(
            fetched = report.fetched,
            indexed = report.indexed,
            skipped = report.skipped,
            "Loaded test data"
        );
        Ok(report)
    }
}
