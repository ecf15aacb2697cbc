//! Dataset transformer implementation.
//!
//! Transforms catalog records into IndexDocument structures for indexing.

use dataset_indexer_shared::{CatalogRecord, IndexDocument};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Errors raised when a record cannot be turned into a document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// A field the document cannot be built without is absent.
    #[error("Record {record} is missing required field {field}")]
    MissingField { record: String, field: &'static str },
}

impl TransformError {
    fn missing(record: &CatalogRecord, field: &'static str) -> Self {
        Self::MissingField {
            record: record.identifier().unwrap_or("<unknown>").to_string(),
            field,
        }
    }
}

/// Maps one catalog record to one index document.
///
/// Implementations must be pure: the same record always yields the same
/// document, so both synchronization paths write identical content.
pub trait RecordTransformer: Send + Sync {
    fn transform(&self, record: &CatalogRecord) -> Result<IndexDocument, TransformError>;
}

/// Research dataset fields copied to the document as they are.
const COPIED_DATASET_FIELDS: [&str; 3] = ["title", "description", "keyword"];

/// Record-level preservation fields copied to the document as they are.
const COPIED_PRESERVATION_FIELDS: [&str; 4] = [
    "preservation_state",
    "preservation_identifier",
    "preservation_dataset_version",
    "preservation_dataset_origin_version",
];

/// Transformer producing the dataset search document.
#[derive(Debug, Clone, Default)]
pub struct DatasetTransformer;

impl DatasetTransformer {
    pub fn new() -> Self {
        Self
    }

    /// Lists of `{identifier, pref_label}` references become their labels.
    fn labels(references: Option<&Value>) -> Option<Value> {
        let labels: Vec<Value> = references?
            .as_array()?
            .iter()
            .filter_map(|reference| reference.get("pref_label").cloned())
            .collect();
        (!labels.is_empty()).then_some(Value::Array(labels))
    }
}

impl RecordTransformer for DatasetTransformer {
    fn transform(&self, record: &CatalogRecord) -> Result<IndexDocument, TransformError> {
        let identifier = record
            .identifier()
            .ok_or_else(|| TransformError::missing(record, "identifier"))?;
        let dataset = record
            .research_dataset()
            .ok_or_else(|| TransformError::missing(record, "research_dataset"))?;
        let preferred_identifier = record
            .preferred_identifier()
            .ok_or_else(|| TransformError::missing(record, "research_dataset.preferred_identifier"))?;

        let mut doc = Map::new();
        doc.insert("identifier".into(), identifier.into());
        doc.insert("preferred_identifier".into(), preferred_identifier.into());
        doc.insert(
            "dataset_version_set".into(),
            record.dataset_version_set().into(),
        );
        if let Some(title) = record.data_catalog_title() {
            doc.insert("data_catalog".into(), title);
        }
        if let Some(catalog_id) = record.data_catalog_identifier() {
            doc.insert("data_catalog_identifier".into(), catalog_id.into());
        }

        let date_modified = record
            .get("date_modified")
            .filter(|v| !v.is_null())
            .or_else(|| record.get("date_created"));
        if let Some(date) = date_modified {
            doc.insert("date_modified".into(), date.clone());
        }

        for field in COPIED_DATASET_FIELDS {
            if let Some(value) = dataset.get(field).filter(|v| !v.is_null()) {
                doc.insert(field.into(), value.clone());
            }
        }
        for field in COPIED_PRESERVATION_FIELDS {
            if let Some(value) = record.get(field).filter(|v| !v.is_null()) {
                doc.insert(field.into(), value.clone());
            }
        }

        if let Some(themes) = Self::labels(dataset.get("theme")) {
            doc.insert("theme".into(), themes);
        }
        if let Some(fields) = Self::labels(dataset.get("field_of_science")) {
            doc.insert("field_of_science".into(), fields);
        }

        debug!(record_id = %identifier, "Transformed record");
        Ok(IndexDocument::new(identifier, Value::Object(doc)))
    }
}
