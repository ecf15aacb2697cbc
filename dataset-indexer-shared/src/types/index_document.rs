//! Search index document.

use serde_json::Value;

use crate::types::RecordId;

/// A document ready to be written to the search index.
///
/// The body is opaque to the synchronization logic; only its presence matters.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    /// Primary key of the document, equal to the catalog record id.
    pub id: RecordId,
    /// JSON body stored in the index.
    pub body: Value,
}

impl IndexDocument {
    /// Create a new document.
    pub fn new(id: impl Into<RecordId>, body: Value) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}
