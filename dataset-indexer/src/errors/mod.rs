//! Error types for the dataset indexer.

use thiserror::Error;

use catalog_client::CatalogError;
use dataset_indexer_repository::SearchIndexError;

/// Errors that can occur while consuming catalog events.
#[derive(Error, Debug)]
pub enum IngestError {
    /// AMQP protocol or channel error.
    #[error("AMQP error: {0}")]
    AmqpError(String),

    /// Could not connect to any broker endpoint.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The source was used before `subscribe` succeeded.
    #[error("Not subscribed")]
    NotSubscribed,
}

impl IngestError {
    /// Create an AMQP error.
    pub fn amqp(msg: impl Into<String>) -> Self {
        Self::AmqpError(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }
}

impl From<lapin::Error> for IngestError {
    fn from(err: lapin::Error) -> Self {
        Self::AmqpError(err.to_string())
    }
}

/// Errors that abort a reconciliation run.
///
/// The index is left as it was whenever one of these is returned before the
/// bulk write starts.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The catalog listing could not be fetched.
    #[error("Catalog fetch failed: {0}")]
    CatalogFetch(#[from] CatalogError),

    /// The index could not be deleted in recreate mode.
    #[error("Unable to delete index {0}")]
    IndexDeletion(String),

    /// The index could not be created.
    #[error("Unable to create index {0}")]
    IndexCreation(String),

    /// The current document ids could not be read.
    #[error("Unable to list indexed documents: {0}")]
    ListIds(#[from] SearchIndexError),
}
