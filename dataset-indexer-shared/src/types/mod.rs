//! Core data structures shared across the dataset indexer.

pub mod catalog_record;
pub mod index_document;
pub mod record_id;

pub use catalog_record::{CatalogRecord, RecordError, RecordRef};
pub use index_document::IndexDocument;
pub use record_id::RecordId;
