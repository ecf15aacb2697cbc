//! Search index error types.
//!
//! This module defines the unified error type for all search index operations,
//! including both low-level backend errors and high-level application errors.

use thiserror::Error;

/// Unified errors from search index operations.
///
/// Used by the `SearchIndexProvider` trait and `IndexStore` for all search index
/// operations. Every error is either transient (retrying may succeed) or
/// permanent; see [`SearchIndexError::is_transient`].
#[derive(Debug, Clone, Error)]
pub enum SearchIndexError {
    /// Validation error (e.g., empty or oversized document id).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Failed to reach the search index backend.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The backend answered with a status that may clear up on retry
    /// (429 or 5xx).
    #[error("Backend unavailable (status {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// Failed to index a document.
    #[error("Index error: {0}")]
    IndexError(String),

    /// Bulk request was rejected as a whole.
    #[error("Bulk index error: {0}")]
    BulkIndexError(String),

    /// Failed to delete a document.
    #[error("Delete error: {0}")]
    DeleteError(String),

    /// Failed to create the search index.
    #[error("Index creation error: {0}")]
    IndexCreationError(String),

    /// Failed to delete the search index.
    #[error("Index deletion error: {0}")]
    IndexDeletionError(String),

    /// The search index does not exist.
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// Failed to parse response from search index backend.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The backend answered in a way no other variant covers.
    #[error("Unexpected response: {0}")]
    Unknown(String),
}

impl SearchIndexError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create an index error.
    pub fn index(msg: impl Into<String>) -> Self {
        Self::IndexError(msg.into())
    }

    /// Create a bulk index error.
    pub fn bulk_index(msg: impl Into<String>) -> Self {
        Self::BulkIndexError(msg.into())
    }

    /// Create a delete error.
    pub fn delete(msg: impl Into<String>) -> Self {
        Self::DeleteError(msg.into())
    }

    /// Create an index not found error.
    pub fn index_not_found(index: impl Into<String>) -> Self {
        Self::IndexNotFound(index.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Classify a non-success HTTP status from the backend.
    ///
    /// 429 and 5xx become [`SearchIndexError::Unavailable`]; anything else is
    /// built with `permanent`.
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        permanent: fn(String) -> Self,
    ) -> Self {
        let message = message.into();
        if status == 429 || status >= 500 {
            Self::Unavailable { status, message }
        } else {
            permanent(format!("status {}: {}", status, message))
        }
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::Unavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        let err = SearchIndexError::from_status(503, "overloaded", SearchIndexError::IndexError);
        assert!(err.is_transient());

        let err = SearchIndexError::from_status(429, "slow down", SearchIndexError::IndexError);
        assert!(err.is_transient());

        let err = SearchIndexError::from_status(400, "mapper_parsing_exception", SearchIndexError::IndexError);
        assert!(!err.is_transient());
        assert!(matches!(err, SearchIndexError::IndexError(_)));
    }

    #[test]
    fn test_connection_errors_are_transient() {
        assert!(SearchIndexError::connection("refused").is_transient());
        assert!(!SearchIndexError::validation("empty id").is_transient());
        assert!(!SearchIndexError::index_not_found("metax").is_transient());
    }
}
