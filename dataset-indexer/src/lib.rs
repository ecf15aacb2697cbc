//! # Dataset Indexer
//!
//! Keeps the dataset search index in line with the metadata catalog.
//!
//! ## Architecture
//!
//! Two paths write to the index, never at the same time:
//!
//! 1. **Consumer**: Receives create/update/delete events from the broker and
//!    resolves each one to an ack or a nack
//! 2. **Reconciler**: Periodically diffs the whole catalog against the index
//!    and applies the difference in bulk
//! 3. **Processor**: Turns catalog records into search documents for both
//! 4. **Orchestrator**: Runs the consumption loop, pauses it while a
//!    reconciliation runs and drains it on shutdown
//!
//! ## Modules
//!
//! - [`config`]: Settings and dependency initialization
//! - [`consumer`]: AMQP consumer and the per-message state machine
//! - [`processor`]: Transforms records into documents
//! - [`reconciler`]: Full catalog-to-index reconciliation
//! - [`orchestrator`]: Coordinates the consumption loop
//! - [`errors`]: Error types for the indexer

pub mod config;
pub mod consumer;
pub mod errors;
pub mod orchestrator;
pub mod processor;
pub mod reconciler;

pub use config::{Dependencies, Settings};
pub use errors::{IngestError, ReconcileError};

use thiserror::Error;

/// Errors that can occur during indexer initialization or execution.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Ingest error.
    #[error("Ingest error: {0}")]
    IngestError(#[from] IngestError),

    /// Reconciliation error.
    #[error("Reconciliation error: {0}")]
    ReconcileError(#[from] ReconcileError),

    /// An index maintenance command failed.
    #[error("Index error: {0}")]
    IndexError(String),
}

impl IndexingError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create an index error.
    pub fn index(msg: impl Into<String>) -> Self {
        Self::IndexError(msg.into())
    }
}
