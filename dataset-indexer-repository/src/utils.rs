//! Utility functions for the dataset indexer repository.

use dataset_indexer_shared::RecordId;

use crate::errors::SearchIndexError;

/// Longest document id the backend accepts, in bytes.
pub const MAX_DOCUMENT_ID_BYTES: usize = 512;

/// Validate a record id for use as a document id.
///
/// # Returns
///
/// * `Ok(())` - If the id can be used as a document primary key
/// * `Err(SearchIndexError::ValidationError)` - If it is empty, too long or
///   contains surrounding whitespace
///
/// # Example
///
/// ```
/// use dataset_indexer_repository::validate_document_id;
/// use dataset_indexer_shared::RecordId;
///
/// assert!(validate_document_id(&RecordId::new("cr-1")).is_ok());
/// assert!(validate_document_id(&RecordId::new("")).is_err());
/// ```
pub fn validate_document_id(id: &RecordId) -> Result<(), SearchIndexError> {
    let id = id.as_str();
    if id.is_empty() {
        return Err(SearchIndexError::validation("Document id is required"));
    }
    if id.len() > MAX_DOCUMENT_ID_BYTES {
        return Err(SearchIndexError::validation(format!(
            "Document id is {} bytes, maximum is {}",
            id.len(),
            MAX_DOCUMENT_ID_BYTES
        )));
    }
    if id.trim() != id {
        return Err(SearchIndexError::validation(format!(
            "Document id '{}' has surrounding whitespace",
            id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_document_id() {
        assert!(validate_document_id(&RecordId::new("cr-1")).is_ok());
        assert!(validate_document_id(&RecordId::new("urn:nbn:fi:att:1234")).is_ok());
    }

    #[test]
    fn test_validate_document_id_empty() {
        let result = validate_document_id(&RecordId::new(""));
        assert!(matches!(
            result.unwrap_err(),
            SearchIndexError::ValidationError(_)
        ));
    }

    #[test]
    fn test_validate_document_id_too_long() {
        let id = RecordId::new("x".repeat(MAX_DOCUMENT_ID_BYTES + 1));
        assert!(validate_document_id(&id).is_err());

        let id = RecordId::new("x".repeat(MAX_DOCUMENT_ID_BYTES));
        assert!(validate_document_id(&id).is_ok());
    }

    #[test]
    fn test_validate_document_id_whitespace() {
        assert!(validate_document_id(&RecordId::new(" cr-1")).is_err());
        assert!(validate_document_id(&RecordId::new("cr-1\n")).is_err());
    }
}
