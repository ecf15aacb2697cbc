//! Catalog records and the references derived from them.
//!
//! A [`CatalogRecord`] is the catalog's serialized record as received from the
//! catalog API or from the event stream. The synchronization logic never reads
//! the record directly; it derives a [`RecordRef`] holding only the fields that
//! drive indexing decisions.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::RecordId;

/// Errors raised while reading a catalog record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The payload is not valid JSON.
    #[error("Malformed record: {0}")]
    Malformed(String),

    /// The payload is JSON but not an object.
    #[error("Record is not a JSON object")]
    NotAnObject,

    /// The record has no `identifier`.
    #[error("Record has no identifier")]
    MissingIdentifier,
}

/// A catalog record as a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    raw: Map<String, Value>,
}

impl CatalogRecord {
    /// Parse a record from raw message or response bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RecordError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| RecordError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Wrap an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        match value {
            Value::Object(raw) => Ok(Self { raw }),
            _ => Err(RecordError::NotAnObject),
        }
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    /// The record's `identifier`, if present and non-empty.
    pub fn identifier(&self) -> Option<&str> {
        non_empty_str(self.raw.get("identifier"))
    }

    /// `research_dataset.preferred_identifier`.
    pub fn preferred_identifier(&self) -> Option<&str> {
        non_empty_str(self.research_dataset()?.get("preferred_identifier"))
    }

    /// The `research_dataset` object.
    pub fn research_dataset(&self) -> Option<&Map<String, Value>> {
        self.raw.get("research_dataset")?.as_object()
    }

    /// `previous_dataset_version.identifier`.
    pub fn previous_version_identifier(&self) -> Option<&str> {
        nested_identifier(self.raw.get("previous_dataset_version"))
    }

    /// `next_dataset_version.identifier`.
    pub fn next_version_identifier(&self) -> Option<&str> {
        nested_identifier(self.raw.get("next_dataset_version"))
    }

    /// Whether the record is flagged as deprecated.
    pub fn is_deprecated(&self) -> bool {
        self.raw.get("deprecated").is_some_and(is_truthy)
    }

    /// Whether the record is a preserved copy of an origin record.
    pub fn has_preservation_origin_version(&self) -> bool {
        self.raw
            .get("preservation_dataset_origin_version")
            .is_some_and(is_truthy)
    }

    /// Whether the record is in the `published` state.
    pub fn is_published(&self) -> bool {
        self.raw.get("state").and_then(Value::as_str) == Some("published")
    }

    /// The record's `preservation_state`, if set.
    pub fn preservation_state(&self) -> Option<i64> {
        self.raw.get("preservation_state").and_then(Value::as_i64)
    }

    /// Identifier of the source catalog the record belongs to.
    ///
    /// Reads `data_catalog.catalog_json.identifier`, falling back to
    /// `data_catalog.identifier`.
    pub fn data_catalog_identifier(&self) -> Option<&str> {
        let data_catalog = self.raw.get("data_catalog")?.as_object()?;
        data_catalog
            .get("catalog_json")
            .and_then(Value::as_object)
            .and_then(|catalog_json| non_empty_str(catalog_json.get("identifier")))
            .or_else(|| non_empty_str(data_catalog.get("identifier")))
    }

    /// Title of the source catalog, falling back to its identifier in every
    /// supported language.
    pub fn data_catalog_title(&self) -> Option<Value> {
        let title = self
            .raw
            .get("data_catalog")
            .and_then(|dc| dc.get("catalog_json"))
            .and_then(|cj| cj.get("title"))
            .filter(|t| is_truthy(t));
        if let Some(title) = title {
            return Some(title.clone());
        }

        self.data_catalog_identifier()
            .map(|id| serde_json::json!({ "en": id, "fi": id }))
    }

    /// Preferred identifiers of every version in the record's version set.
    pub fn dataset_version_set(&self) -> Vec<String> {
        self.raw
            .get("dataset_version_set")
            .and_then(Value::as_array)
            .map(|versions| {
                versions
                    .iter()
                    .filter_map(|v| non_empty_str(v.get("preferred_identifier")))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Derive the indexing-relevant reference for this record.
    pub fn record_ref(&self) -> Result<RecordRef, RecordError> {
        let id = self.identifier().ok_or(RecordError::MissingIdentifier)?;

        Ok(RecordRef {
            id: RecordId::new(id),
            preferred_id: self.preferred_identifier().map(str::to_string),
            previous_version_id: self.previous_version_identifier().map(RecordId::from),
            next_version_id: self.next_version_identifier().map(RecordId::from),
            deprecated: self.is_deprecated(),
            has_origin_version: self.has_preservation_origin_version(),
            catalog_id: self.data_catalog_identifier().map(str::to_string),
            published: self.is_published(),
            preservation_state: self.preservation_state(),
        })
    }
}

/// The fields of a catalog record that drive indexing decisions.
///
/// Never persisted; always recomputed from the source record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub id: RecordId,
    pub preferred_id: Option<String>,
    pub previous_version_id: Option<RecordId>,
    pub next_version_id: Option<RecordId>,
    pub deprecated: bool,
    pub has_origin_version: bool,
    pub catalog_id: Option<String>,
    pub published: bool,
    pub preservation_state: Option<i64>,
}

impl RecordRef {
    /// A minimal, published reference in the given catalog. Handy for tests.
    pub fn new(id: impl Into<RecordId>, catalog_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            preferred_id: None,
            previous_version_id: None,
            next_version_id: None,
            deprecated: false,
            has_origin_version: false,
            catalog_id: Some(catalog_id.into()),
            published: true,
            preservation_state: None,
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn nested_identifier(value: Option<&Value>) -> Option<&str> {
    non_empty_str(value?.get("identifier"))
}

/// Catalog flags are loosely typed; empty values count as unset.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
