//! # Dataset Indexer Shared
//!
//! Shared data structures used by both synchronization paths of the dataset
//! search indexer: catalog records and the references derived from them, the
//! eligibility predicate deciding which records belong in the index, and the
//! retry policy used for every transient network call.

pub mod eligibility;
pub mod retry;
pub mod types;

pub use eligibility::{EligibilityRules, Exclusion};
pub use retry::RetryPolicy;
pub use types::{CatalogRecord, IndexDocument, RecordError, RecordId, RecordRef};
