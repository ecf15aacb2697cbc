//! # Dataset Indexer Repository
//!
//! This crate provides traits and implementations for interacting with the
//! dataset search index. It includes definitions for errors, interfaces, a
//! concrete implementation for OpenSearch and an in-memory implementation for
//! tests and local runs.

pub mod config;
pub mod errors;
pub mod interfaces;
pub mod memory;
pub mod opensearch;
pub mod service;
pub mod types;
pub mod utils;

pub use config::{IndexStoreConfig, DEFAULT_BULK_CHUNK_SIZE};
pub use errors::SearchIndexError;
pub use interfaces::SearchIndexProvider;
pub use memory::InMemoryProvider;
pub use opensearch::OpenSearchProvider;
pub use service::IndexStore;
pub use types::{BatchOperationResult, BatchOperationSummary, BulkOperation};
pub use utils::validate_document_id;
