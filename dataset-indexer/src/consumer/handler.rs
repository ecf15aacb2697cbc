//! Per-message state machine.
//!
//! Every inbound message resolves to exactly one [`Disposition`]. The handler
//! never acks or nacks itself; the orchestrator settles the message with the
//! broker once the disposition is known.

use std::sync::Arc;

use dataset_indexer_repository::{IndexStore, SearchIndexError};
use dataset_indexer_shared::{EligibilityRules, RecordId};
use tracing::{debug, error, info, instrument, warn};

use crate::consumer::messages::{Disposition, EventKind, InboundMessage, RecordEvent};
use crate::processor::RecordTransformer;

/// Applies catalog events to the search index.
pub struct EventHandler {
    store: Arc<IndexStore>,
    transformer: Arc<dyn RecordTransformer>,
    rules: EligibilityRules,
}

impl EventHandler {
    pub fn new(
        store: Arc<IndexStore>,
        transformer: Arc<dyn RecordTransformer>,
        rules: EligibilityRules,
    ) -> Self {
        Self {
            store,
            transformer,
            rules,
        }
    }

    /// Resolve one message to its disposition.
    #[instrument(skip(self, message), fields(kind = %message.kind, delivery_tag = message.delivery_tag))]
    pub async fn handle(&self, message: &InboundMessage) -> Disposition {
        if !self.store.ensure_exists().await {
            error!("Search index is not available, dropping message");
            return Disposition::NackDrop;
        }

        let event = match RecordEvent::parse(message) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    error = %e,
                    payload = %String::from_utf8_lossy(&message.payload),
                    "Unable to read catalog record from message"
                );
                return Disposition::NackDrop;
            }
        };

        let disposition = match event.kind {
            EventKind::Create => self.on_create(&event).await,
            EventKind::Update => self.on_update(&event).await,
            EventKind::Delete => self.on_delete(&event).await,
        };

        debug!(record_id = %event.record.id, disposition = %disposition, "Message handled");
        disposition
    }

    async fn on_create(&self, event: &RecordEvent) -> Disposition {
        let record = &event.record;

        if let Some(previous) = &record.previous_version_id {
            // Best effort; the sweep removes anything left behind.
            match self.store.remove(previous).await {
                Ok(()) => info!(
                    record_id = %record.id,
                    previous_id = %previous,
                    "Removed previous dataset version from index"
                ),
                Err(e) => warn!(
                    record_id = %record.id,
                    previous_id = %previous,
                    error = %e,
                    "Unable to remove previous dataset version from index"
                ),
            }
        }

        if record.has_origin_version {
            info!(record_id = %record.id, "Record is a preservation copy, keeping it out of the index");
            return self.remove(&record.id).await;
        }
        if self.rules.is_preservation_pending(record) {
            info!(record_id = %record.id, "Record is not accepted into preservation yet");
            return self.remove(&record.id).await;
        }

        self.reindex(event).await
    }

    async fn on_update(&self, event: &RecordEvent) -> Disposition {
        let record = &event.record;

        if record.deprecated {
            info!(record_id = %record.id, "Record is deprecated, removing from index");
            return self.remove(&record.id).await;
        }
        if record.next_version_id.is_some() {
            info!(record_id = %record.id, "Record has a newer version, not indexing");
            return Disposition::Ack;
        }
        if record.has_origin_version {
            info!(record_id = %record.id, "Record is a preservation copy, keeping it out of the index");
            return self.remove(&record.id).await;
        }
        if self.rules.is_preservation_pending(record) {
            info!(record_id = %record.id, "Record is not accepted into preservation yet");
            return self.remove(&record.id).await;
        }

        self.reindex(event).await
    }

    async fn on_delete(&self, event: &RecordEvent) -> Disposition {
        info!(record_id = %event.record.id, "Deleting record from index");
        self.remove(&event.record.id).await
    }

    /// Shared create/update step: check eligibility, transform, write.
    ///
    /// Records from an excluded source are dropped. Any other exclusion
    /// removes the record's document and acks.
    async fn reindex(&self, event: &RecordEvent) -> Disposition {
        let record = &event.record;

        match self.rules.check(record) {
            Ok(()) => {}
            Err(exclusion) if exclusion.is_source_exclusion() => {
                warn!(record_id = %record.id, reason = %exclusion, "Record should not be indexed");
                return Disposition::NackDrop;
            }
            Err(exclusion) => {
                info!(record_id = %record.id, reason = %exclusion, "Record not eligible, removing from index");
                return self.remove(&record.id).await;
            }
        }
        if record.preferred_id.is_none() {
            error!(record_id = %record.id, "Record has no preferred identifier");
            return Disposition::NackDrop;
        }

        let document = match self.transformer.transform(&event.raw) {
            Ok(document) => document,
            Err(e) => {
                error!(record_id = %record.id, error = %e, "Unable to transform record");
                return Disposition::NackDrop;
            }
        };

        let result = self.store.upsert(&document).await;
        if result.is_ok() {
            info!(record_id = %record.id, "Indexed record");
        }
        Self::disposition_for(&record.id, result)
    }

    async fn remove(&self, id: &RecordId) -> Disposition {
        Self::disposition_for(id, self.store.remove(id).await)
    }

    fn disposition_for(id: &RecordId, result: Result<(), SearchIndexError>) -> Disposition {
        match result {
            Ok(()) => Disposition::Ack,
            Err(e) if e.is_transient() => {
                warn!(record_id = %id, error = %e, "Transient index failure, requeueing");
                Disposition::NackRequeue
            }
            Err(e) => {
                error!(record_id = %id, error = %e, "Index write failed permanently");
                Disposition::NackDrop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::DatasetTransformer;
    use dataset_indexer_repository::InMemoryProvider;
    use dataset_indexer_shared::eligibility::{LEGACY_CATALOG, PRESERVATION_CATALOG};
    use dataset_indexer_shared::IndexDocument;
    use serde_json::{json, Value};

    const IDA: &str = "urn:nbn:fi:att:data-catalog-ida";

    fn record(id: &str) -> Value {
        json!({
            "identifier": id,
            "state": "published",
            "data_catalog": { "catalog_json": { "identifier": IDA } },
            "research_dataset": {
                "preferred_identifier": format!("urn:{}", id),
                "title": { "en": id }
            }
        })
    }

    fn message(kind: EventKind, body: &Value) -> InboundMessage {
        InboundMessage::new(kind, 1, serde_json::to_vec(body).unwrap())
    }

    fn handler_with(provider: Arc<InMemoryProvider>) -> EventHandler {
        EventHandler::new(
            Arc::new(IndexStore::new(Box::new(provider))),
            Arc::new(DatasetTransformer::new()),
            EligibilityRules::default(),
        )
    }

    fn existing(ids: &[&str]) -> Arc<InMemoryProvider> {
        Arc::new(InMemoryProvider::with_documents(
            ids.iter().map(|id| IndexDocument::new(*id, json!({}))),
        ))
    }

    #[tokio::test]
    async fn test_create_indexes_record() {
        let provider = existing(&[]);
        let handler = handler_with(provider.clone());

        let disposition = handler.handle(&message(EventKind::Create, &record("cr-1"))).await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(provider.document("cr-1").unwrap()["preferred_identifier"], "urn:cr-1");
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let provider = existing(&[]);
        let handler = handler_with(provider.clone());
        let msg = message(EventKind::Create, &record("cr-1"));

        assert_eq!(handler.handle(&msg).await, Disposition::Ack);
        let first = provider.document("cr-1");
        assert_eq!(handler.handle(&msg).await, Disposition::Ack);

        assert_eq!(provider.document("cr-1"), first);
        assert_eq!(provider.document_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_create_creates_missing_index() {
        let provider = Arc::new(InMemoryProvider::new());
        let handler = handler_with(provider.clone());

        let disposition = handler.handle(&message(EventKind::Create, &record("cr-1"))).await;

        assert_eq!(disposition, Disposition::Ack);
        assert!(provider.is_index_present());
    }

    #[tokio::test]
    async fn test_unavailable_index_drops_message() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.set_index_failure(Some(SearchIndexError::connection("refused")));
        let handler = handler_with(provider);

        let disposition = handler.handle(&message(EventKind::Create, &record("cr-1"))).await;
        assert_eq!(disposition, Disposition::NackDrop);
    }

    #[tokio::test]
    async fn test_create_supersedes_previous_version() {
        let provider = existing(&["cr-1"]);
        let handler = handler_with(provider.clone());

        let mut body = record("cr-2");
        body["previous_dataset_version"] = json!({ "identifier": "cr-1" });

        let disposition = handler.handle(&message(EventKind::Create, &body)).await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(provider.document_ids(), vec![RecordId::new("cr-2")]);
    }

    #[tokio::test]
    async fn test_create_preservation_copy_is_removed() {
        let provider = existing(&["cr-1"]);
        let handler = handler_with(provider.clone());

        let mut body = record("cr-1");
        body["preservation_dataset_origin_version"] = json!({ "identifier": "cr-0" });

        let disposition = handler.handle(&message(EventKind::Create, &body)).await;

        assert_eq!(disposition, Disposition::Ack);
        assert!(provider.document_ids().is_empty());
    }

    #[tokio::test]
    async fn test_preservation_catalog_requires_accepted_state() {
        let provider = existing(&[]);
        let handler = handler_with(provider.clone());

        let mut body = record("cr-1");
        body["data_catalog"] = json!({ "catalog_json": { "identifier": PRESERVATION_CATALOG } });
        body["preservation_state"] = json!(80);
        assert_eq!(
            handler.handle(&message(EventKind::Update, &body)).await,
            Disposition::Ack
        );
        assert!(provider.document_ids().is_empty());

        body["preservation_state"] = json!(120);
        assert_eq!(
            handler.handle(&message(EventKind::Update, &body)).await,
            Disposition::Ack
        );
        assert_eq!(provider.document_ids(), vec![RecordId::new("cr-1")]);
    }

    #[tokio::test]
    async fn test_update_deprecated_is_removed() {
        let provider = existing(&["cr-1"]);
        let handler = handler_with(provider.clone());

        let mut body = record("cr-1");
        body["deprecated"] = json!(true);

        assert_eq!(
            handler.handle(&message(EventKind::Update, &body)).await,
            Disposition::Ack
        );
        assert!(provider.document_ids().is_empty());
    }

    #[tokio::test]
    async fn test_update_with_next_version_is_not_indexed() {
        let provider = existing(&[]);
        let handler = handler_with(provider.clone());

        let mut body = record("cr-1");
        body["next_dataset_version"] = json!({ "identifier": "cr-2" });

        assert_eq!(
            handler.handle(&message(EventKind::Update, &body)).await,
            Disposition::Ack
        );
        assert!(provider.document_ids().is_empty());
    }

    #[tokio::test]
    async fn test_update_for_unknown_record_creates_it() {
        let provider = existing(&[]);
        let handler = handler_with(provider.clone());

        assert_eq!(
            handler.handle(&message(EventKind::Update, &record("cr-9"))).await,
            Disposition::Ack
        );
        assert_eq!(provider.document_ids(), vec![RecordId::new("cr-9")]);
    }

    #[tokio::test]
    async fn test_excluded_catalog_is_dropped() {
        let provider = existing(&[]);
        let handler = handler_with(provider.clone());

        let mut body = record("cr-1");
        body["data_catalog"] = json!({ "catalog_json": { "identifier": LEGACY_CATALOG } });

        assert_eq!(
            handler.handle(&message(EventKind::Create, &body)).await,
            Disposition::NackDrop
        );
        assert!(provider.document_ids().is_empty());
    }

    #[tokio::test]
    async fn test_unpublished_record_is_dropped() {
        let provider = existing(&[]);
        let handler = handler_with(provider.clone());

        let mut body = record("cr-1");
        body["state"] = json!("draft");

        assert_eq!(
            handler.handle(&message(EventKind::Update, &body)).await,
            Disposition::NackDrop
        );
    }

    #[tokio::test]
    async fn test_malformed_messages_are_dropped() {
        let handler = handler_with(existing(&[]));

        let garbage = InboundMessage::new(EventKind::Create, 1, b"{oops".to_vec());
        assert_eq!(handler.handle(&garbage).await, Disposition::NackDrop);

        let no_id = message(EventKind::Update, &json!({ "state": "published" }));
        assert_eq!(handler.handle(&no_id).await, Disposition::NackDrop);

        let mut no_preferred = record("cr-1");
        no_preferred["research_dataset"] = json!({ "title": { "en": "x" } });
        assert_eq!(
            handler.handle(&message(EventKind::Create, &no_preferred)).await,
            Disposition::NackDrop
        );
    }

    #[tokio::test]
    async fn test_delete_removes_document() {
        let provider = existing(&["cr-1"]);
        let handler = handler_with(provider.clone());

        let body = json!({ "identifier": "cr-1" });
        assert_eq!(
            handler.handle(&message(EventKind::Delete, &body)).await,
            Disposition::Ack
        );
        assert!(provider.document_ids().is_empty());

        // Deleting again is still an ack.
        assert_eq!(
            handler.handle(&message(EventKind::Delete, &body)).await,
            Disposition::Ack
        );
    }

    #[tokio::test]
    async fn test_write_failures_map_to_dispositions() {
        let provider = existing(&["cr-1"]);
        let handler = handler_with(provider.clone());
        let delete = message(EventKind::Delete, &json!({ "identifier": "cr-1" }));

        provider.set_write_failure(Some(SearchIndexError::Unavailable {
            status: 503,
            message: "overloaded".into(),
        }));
        assert_eq!(handler.handle(&delete).await, Disposition::NackRequeue);
        assert_eq!(
            handler.handle(&message(EventKind::Update, &record("cr-2"))).await,
            Disposition::NackRequeue
        );

        provider.set_write_failure(Some(SearchIndexError::index("mapper_parsing_exception")));
        assert_eq!(handler.handle(&delete).await, Disposition::NackDrop);
        assert_eq!(
            handler.handle(&message(EventKind::Update, &record("cr-2"))).await,
            Disposition::NackDrop
        );
    }

    #[tokio::test]
    async fn test_create_deprecated_record_is_not_indexed() {
        let provider = existing(&[]);
        let handler = handler_with(provider.clone());

        let mut body = record("cr-1");
        body["deprecated"] = json!(true);

        assert_eq!(
            handler.handle(&message(EventKind::Create, &body)).await,
            Disposition::Ack
        );
        assert!(provider.document_ids().is_empty());
    }

    #[tokio::test]
    async fn test_create_superseded_record_is_not_indexed() {
        let provider = existing(&["cr-1"]);
        let handler = handler_with(provider.clone());

        let mut body = record("cr-1");
        body["next_dataset_version"] = json!({ "identifier": "cr-2" });

        assert_eq!(
            handler.handle(&message(EventKind::Create, &body)).await,
            Disposition::Ack
        );
        assert!(provider.document_ids().is_empty());
    }

    #[tokio::test]
    async fn test_create_with_unindexed_previous_version() {
        let provider = existing(&[]);
        let handler = handler_with(provider.clone());

        let mut body = record("cr-2");
        body["previous_dataset_version"] = json!({ "identifier": "cr-1" });

        assert_eq!(
            handler.handle(&message(EventKind::Create, &body)).await,
            Disposition::Ack
        );
        assert_eq!(provider.document_ids(), vec![RecordId::new("cr-2")]);
    }
}
