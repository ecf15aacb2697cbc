//! Request and response types for search index operations.

use dataset_indexer_shared::{IndexDocument, RecordId};
use serde_json::{json, Value};

use crate::errors::SearchIndexError;

/// A single operation in a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    /// Index the document under its id, replacing any previous version.
    Upsert(IndexDocument),
    /// Remove the document with the given id.
    Delete(RecordId),
}

impl BulkOperation {
    /// The document id the operation targets.
    pub fn id(&self) -> &RecordId {
        match self {
            Self::Upsert(document) => &document.id,
            Self::Delete(id) => id,
        }
    }

    /// The bulk API action name.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Upsert(_) => "index",
            Self::Delete(_) => "delete",
        }
    }

    /// The action line of the newline-delimited bulk body.
    pub fn action_line(&self) -> Value {
        json!({ self.action(): { "_id": self.id().as_str() } })
    }

    /// The source line following the action line, if the action has one.
    pub fn source(&self) -> Option<&Value> {
        match self {
            Self::Upsert(document) => Some(&document.body),
            Self::Delete(_) => None,
        }
    }
}

/// Render operations as a newline-delimited bulk body.
///
/// Used both for logging failed chunks and by backends that send raw bodies.
pub fn bulk_payload(operations: &[BulkOperation]) -> String {
    let mut payload = String::new();
    for operation in operations {
        payload.push_str(&operation.action_line().to_string());
        payload.push('\n');
        if let Some(source) = operation.source() {
            payload.push_str(&source.to_string());
            payload.push('\n');
        }
    }
    payload
}

/// Result of a batch operation for a single item.
#[derive(Debug, Clone)]
pub struct BatchOperationResult {
    /// The targeted document id.
    pub id: RecordId,
    /// `index` or `delete`.
    pub action: &'static str,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error if the operation failed.
    pub error: Option<SearchIndexError>,
}

/// Summary of a batch operation containing aggregate statistics and individual results.
///
/// Bulk requests can partially fail; callers inspect `failed` and the
/// individual results rather than relying on the request status alone.
#[derive(Debug, Clone, Default)]
pub struct BatchOperationSummary {
    /// Total number of items in the batch.
    pub total: usize,
    /// Number of successful operations.
    pub succeeded: usize,
    /// Number of failed operations.
    pub failed: usize,
    /// Individual results for each item.
    pub results: Vec<BatchOperationResult>,
}

impl BatchOperationSummary {
    /// Build a summary from per-item results.
    pub fn from_results(results: Vec<BatchOperationResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }

    /// Whether every operation in the batch succeeded.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// The results that failed.
    pub fn failures(&self) -> impl Iterator<Item = &BatchOperationResult> {
        self.results.iter().filter(|r| !r.success)
    }
}
