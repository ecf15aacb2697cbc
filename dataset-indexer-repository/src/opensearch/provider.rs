//! OpenSearch provider implementation.
//!
//! This module provides the concrete implementation of `SearchIndexProvider`
//! using the OpenSearch Rust crate. The same REST API is served by
//! Elasticsearch, so the provider works against either backend.

use std::collections::HashSet;

use async_trait::async_trait;
use dataset_indexer_shared::{IndexDocument, RecordId};
use opensearch::{
    http::{
        request::JsonBody,
        response::Response,
        transport::{SingleNodeConnectionPool, TransportBuilder},
    },
    indices::{IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts},
    BulkParts, ClearScrollParts, DeleteParts, ExistsParts, IndexParts, OpenSearch, ScrollParts,
    SearchParts,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::errors::SearchIndexError;
use crate::interfaces::SearchIndexProvider;
use crate::opensearch::index_config::{get_index_settings, IndexConfig};
use crate::types::{BatchOperationResult, BatchOperationSummary, BulkOperation};

/// How long a scroll context stays alive between pages.
const SCROLL_KEEP_ALIVE: &str = "2m";

/// Documents per scroll page.
const SCROLL_PAGE_SIZE: i64 = 1000;

/// OpenSearch provider implementation.
///
/// # Example
///
/// ```ignore
/// use dataset_indexer_repository::opensearch::{IndexConfig, OpenSearchProvider};
/// use dataset_indexer_shared::IndexDocument;
///
/// let provider = OpenSearchProvider::new("http://localhost:9200", IndexConfig::default()).await?;
/// provider.create_index().await?;
/// provider
///     .upsert_document(&IndexDocument::new("cr-1", serde_json::json!({ "title": { "en": "A" } })))
///     .await?;
/// ```
pub struct OpenSearchProvider {
    client: OpenSearch,
    index_config: IndexConfig,
}

impl OpenSearchProvider {
    /// Create a new OpenSearch provider connected to the specified URL.
    ///
    /// # Arguments
    ///
    /// * `url` - The OpenSearch server URL (e.g., "http://localhost:9200")
    /// * `index_config` - The index configuration
    ///
    /// # Returns
    ///
    /// * `Ok(OpenSearchProvider)` - A new provider instance
    /// * `Err(SearchIndexError)` - If connection setup fails
    pub async fn new(url: &str, index_config: IndexConfig) -> Result<Self, SearchIndexError> {
        let parsed_url =
            Url::parse(url).map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .build()
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let client = OpenSearch::new(transport);

        info!(
            url = %url,
            index = %index_config.name,
            "Created OpenSearch provider"
        );

        Ok(Self {
            client,
            index_config,
        })
    }

    fn index(&self) -> &str {
        &self.index_config.name
    }

    /// Turn a non-success response into an error, classifying the status.
    async fn error_from_response(
        response: Response,
        context: &str,
        permanent: fn(String) -> SearchIndexError,
    ) -> SearchIndexError {
        let status = response.status_code();
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "{} request failed", context);
        SearchIndexError::from_status(status.as_u16(), format!("{}: {}", context, body), permanent)
    }

    /// Read one page of scroll results, returning the scroll id and the hit ids.
    fn parse_scroll_page(body: &Value) -> Result<(Option<String>, Vec<RecordId>), SearchIndexError> {
        let scroll_id = body["_scroll_id"].as_str().map(str::to_string);
        let hits = body["hits"]["hits"]
            .as_array()
            .ok_or_else(|| SearchIndexError::parse("search response has no hits array"))?;

        let ids = hits
            .iter()
            .filter_map(|hit| hit["_id"].as_str())
            .map(RecordId::from)
            .collect();

        Ok((scroll_id, ids))
    }

    /// Match bulk response items to the operations that produced them.
    fn parse_bulk_response(
        operations: &[BulkOperation],
        body: &Value,
    ) -> Result<BatchOperationSummary, SearchIndexError> {
        let items = body["items"]
            .as_array()
            .ok_or_else(|| SearchIndexError::parse("bulk response has no items array"))?;

        if items.len() != operations.len() {
            return Err(SearchIndexError::parse(format!(
                "bulk response has {} items for {} operations",
                items.len(),
                operations.len()
            )));
        }

        let results = operations
            .iter()
            .zip(items)
            .map(|(operation, item)| {
                let outcome = &item[operation.action()];
                let status = outcome["status"].as_u64().unwrap_or(0) as u16;
                // Deleting an absent document is a success.
                let success = (200..300).contains(&status)
                    || (matches!(operation, BulkOperation::Delete(_)) && status == 404);

                let error = (!success).then(|| {
                    let reason = outcome["error"].to_string();
                    match operation {
                        BulkOperation::Upsert(_) => {
                            SearchIndexError::from_status(status, reason, SearchIndexError::IndexError)
                        }
                        BulkOperation::Delete(_) => {
                            SearchIndexError::from_status(status, reason, SearchIndexError::DeleteError)
                        }
                    }
                });

                BatchOperationResult {
                    id: operation.id().clone(),
                    action: operation.action(),
                    success,
                    error,
                }
            })
            .collect();

        Ok(BatchOperationSummary::from_results(results))
    }

    async fn clear_scroll(&self, scroll_id: &str) {
        let result = self
            .client
            .clear_scroll(ClearScrollParts::None)
            .body(json!({ "scroll_id": [scroll_id] }))
            .send()
            .await;

        if let Err(e) = result {
            warn!(error = %e, "Failed to clear scroll context");
        }
    }
}

#[async_trait]
impl SearchIndexProvider for OpenSearchProvider {
    fn index_name(&self) -> &str {
        self.index()
    }

    async fn index_exists(&self) -> Result<bool, SearchIndexError> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[self.index()]))
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        match response.status_code().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(Self::error_from_response(response, "Index exists", SearchIndexError::Unknown).await),
        }
    }

    #[instrument(skip(self), fields(index = %self.index()))]
    async fn create_index(&self) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(self.index()))
            .body(get_index_settings(&self.index_config))
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let status = response.status_code();
        if status.is_success() {
            info!("Index created");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        // Another writer may have created it between the existence check and now.
        if status.as_u16() == 400 && body.contains("resource_already_exists_exception") {
            debug!("Index already exists");
            return Ok(());
        }

        error!(status = %status, body = %body, "Create index request failed");
        Err(SearchIndexError::from_status(
            status.as_u16(),
            body,
            SearchIndexError::IndexCreationError,
        ))
    }

    #[instrument(skip(self), fields(index = %self.index()))]
    async fn delete_index(&self) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .indices()
            .delete(IndicesDeleteParts::Index(&[self.index()]))
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let status = response.status_code();
        if status.as_u16() == 404 {
            debug!("Index did not exist");
            return Ok(());
        }
        if !status.is_success() {
            return Err(Self::error_from_response(
                response,
                "Delete index",
                SearchIndexError::IndexDeletionError,
            )
            .await);
        }

        info!("Index deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(index = %self.index()))]
    async fn list_document_ids(&self) -> Result<Option<HashSet<RecordId>>, SearchIndexError> {
        if !self.index_exists().await? {
            return Ok(None);
        }

        let response = self
            .client
            .search(SearchParts::Index(&[self.index()]))
            .scroll(SCROLL_KEEP_ALIVE)
            .size(SCROLL_PAGE_SIZE)
            .body(json!({
                "_source": false,
                "query": { "match_all": {} }
            }))
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        if response.status_code().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status_code().is_success() {
            return Err(Self::error_from_response(response, "Search", SearchIndexError::ParseError).await);
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;
        let (mut scroll_id, mut page) = Self::parse_scroll_page(&body)?;
        let mut ids: HashSet<RecordId> = HashSet::new();

        while !page.is_empty() {
            ids.extend(page);

            let Some(current) = scroll_id.as_deref() else {
                break;
            };

            let response = self
                .client
                .scroll(ScrollParts::None)
                .body(json!({
                    "scroll": SCROLL_KEEP_ALIVE,
                    "scroll_id": current
                }))
                .send()
                .await
                .map_err(|e| SearchIndexError::connection(e.to_string()))?;

            if !response.status_code().is_success() {
                return Err(Self::error_from_response(response, "Scroll", SearchIndexError::ParseError).await);
            }

            let body = response
                .json::<Value>()
                .await
                .map_err(|e| SearchIndexError::parse(e.to_string()))?;
            let (next_scroll_id, next_page) = Self::parse_scroll_page(&body)?;
            scroll_id = next_scroll_id.or(scroll_id);
            page = next_page;
        }

        if let Some(scroll_id) = scroll_id {
            self.clear_scroll(&scroll_id).await;
        }

        debug!(count = ids.len(), "Listed document ids");
        Ok(Some(ids))
    }

    async fn document_exists(&self, id: &RecordId) -> Result<bool, SearchIndexError> {
        let response = self
            .client
            .exists(ExistsParts::IndexId(self.index(), id.as_str()))
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        match response.status_code().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(Self::error_from_response(response, "Document exists", SearchIndexError::Unknown).await),
        }
    }

    async fn upsert_document(&self, document: &IndexDocument) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .index(IndexParts::IndexId(self.index(), document.id.as_str()))
            .body(&document.body)
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        if !response.status_code().is_success() {
            return Err(Self::error_from_response(response, "Index", SearchIndexError::IndexError).await);
        }

        debug!(doc_id = %document.id, "Document indexed");
        Ok(())
    }

    async fn delete_document(&self, id: &RecordId) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .delete(DeleteParts::IndexId(self.index(), id.as_str()))
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let status = response.status_code();

        // 404 is acceptable - document may not exist
        if !status.is_success() && status.as_u16() != 404 {
            return Err(Self::error_from_response(response, "Delete", SearchIndexError::DeleteError).await);
        }

        debug!(doc_id = %id, "Document deleted");
        Ok(())
    }

    async fn bulk(
        &self,
        operations: &[BulkOperation],
    ) -> Result<BatchOperationSummary, SearchIndexError> {
        if operations.is_empty() {
            return Ok(BatchOperationSummary::default());
        }

        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(operations.len() * 2);
        for operation in operations {
            body.push(JsonBody::new(operation.action_line()));
            if let Some(source) = operation.source() {
                body.push(JsonBody::new(source.clone()));
            }
        }

        let response = self
            .client
            .bulk(BulkParts::Index(self.index()))
            .body(body)
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        if !response.status_code().is_success() {
            return Err(Self::error_from_response(response, "Bulk", SearchIndexError::BulkIndexError).await);
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;

        Self::parse_bulk_response(operations, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scroll_page() {
        let body = json!({
            "_scroll_id": "abc",
            "hits": { "hits": [ { "_id": "cr-1" }, { "_id": "cr-2" } ] }
        });

        let (scroll_id, ids) = OpenSearchProvider::parse_scroll_page(&body).unwrap();
        assert_eq!(scroll_id.as_deref(), Some("abc"));
        assert_eq!(ids, vec![RecordId::new("cr-1"), RecordId::new("cr-2")]);
    }

    #[test]
    fn test_parse_scroll_page_without_hits() {
        let result = OpenSearchProvider::parse_scroll_page(&json!({ "error": "boom" }));
        assert!(matches!(result, Err(SearchIndexError::ParseError(_))));
    }

    #[test]
    fn test_parse_bulk_response() {
        let operations = vec![
            BulkOperation::Upsert(IndexDocument::new("cr-1", json!({}))),
            BulkOperation::Upsert(IndexDocument::new("cr-2", json!({}))),
            BulkOperation::Delete(RecordId::new("cr-3")),
            BulkOperation::Delete(RecordId::new("cr-4")),
        ];
        let body = json!({
            "errors": true,
            "items": [
                { "index": { "_id": "cr-1", "status": 201 } },
                { "index": { "_id": "cr-2", "status": 400, "error": { "type": "mapper_parsing_exception" } } },
                { "delete": { "_id": "cr-3", "status": 200 } },
                { "delete": { "_id": "cr-4", "status": 404 } }
            ]
        });

        let summary = OpenSearchProvider::parse_bulk_response(&operations, &body).unwrap();

        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 1);

        let failure = summary.failures().next().unwrap();
        assert_eq!(failure.id, RecordId::new("cr-2"));
        assert_eq!(failure.action, "index");
        assert!(matches!(failure.error, Some(SearchIndexError::IndexError(_))));
    }

    #[test]
    fn test_parse_bulk_response_rejected_item_is_transient() {
        let operations = vec![BulkOperation::Upsert(IndexDocument::new("cr-1", json!({})))];
        let body = json!({
            "items": [ { "index": { "_id": "cr-1", "status": 429 } } ]
        });

        let summary = OpenSearchProvider::parse_bulk_response(&operations, &body).unwrap();
        let failure = summary.failures().next().unwrap();
        assert!(failure.error.as_ref().unwrap().is_transient());
    }

    #[test]
    fn test_parse_bulk_response_item_count_mismatch() {
        let operations = vec![BulkOperation::Delete(RecordId::new("cr-1"))];
        let result = OpenSearchProvider::parse_bulk_response(&operations, &json!({ "items": [] }));
        assert!(matches!(result, Err(SearchIndexError::ParseError(_))));
    }
}
