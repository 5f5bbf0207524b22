//! Per-item processing: annotate, filter, persist, enforce retention.

use serde_json::Value;
use tracing::{debug, error, info, warn};

use feedbase_common::ContentRecord;
use feedbase_store::{ContentStore, SaveSummary};

use crate::geocode::Annotator;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Also persist the originals a repost points at.
    pub follow_reposts: bool,
    /// Store the feed item as received instead of the normalized document.
    pub save_raw: bool,
    /// Drop content that ends up without coordinates.
    pub only_coords: bool,
    /// Retention limit; `None` keeps everything.
    pub prune_limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Saved(SaveSummary),
    /// Dropped by the coordinate-only filter.
    Filtered,
    /// The store rejected the write; the item was logged and dropped.
    Failed,
}

pub struct Pipeline {
    store: ContentStore,
    annotator: Option<Annotator>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(store: ContentStore, options: PipelineOptions) -> Self {
        Self {
            store,
            annotator: None,
            options,
        }
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn annotator(&self) -> Option<&Annotator> {
        self.annotator.as_ref()
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    /// Run one content record through the pipeline. Never fails: storage
    /// errors are logged with the item and reported as [`ItemOutcome::Failed`].
    pub async fn process(&self, mut record: ContentRecord, raw: &Value) -> ItemOutcome {
        if let Some(annotator) = &self.annotator {
            annotator.annotate(&mut record).await;
        }

        if self.options.only_coords && record.coordinates.is_none() {
            debug!(id = %record.id, "No coordinates, skipping");
            return ItemOutcome::Filtered;
        }

        let raw = self.options.save_raw.then_some(raw);
        let summary = match self
            .store
            .save_content(&record, self.options.follow_reposts, raw)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                error!(id = %record.id, error = %e, item = %item_json(&record, raw), "Failed to save content");
                return ItemOutcome::Failed;
            }
        };
        debug!(
            id = %record.id,
            content_written = summary.content_written,
            authors_created = summary.authors_created,
            "Saved content"
        );

        if let Some(limit) = self.options.prune_limit {
            match self.store.enforce_retention(limit).await {
                Ok(Some(report)) => info!(
                    count_before = report.count_before,
                    deleted = report.deleted,
                    "Pruned oldest content"
                ),
                Ok(None) => {}
                Err(e) => warn!(error = %e, limit, "Retention pass failed"),
            }
        }

        ItemOutcome::Saved(summary)
    }
}

fn item_json(record: &ContentRecord, raw: Option<&Value>) -> String {
    match raw {
        Some(raw) => raw.to_string(),
        None => serde_json::to_string(record).unwrap_or_else(|_| record.id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use feedbase_store::MemoryStore;
    use serde_json::json;

    fn item() -> Value {
        json!({
            "id_str": "42",
            "created_at": "Tue Feb 17 21:03:24 +0000 2015",
            "text": "pizza",
            "filter_level": "low",
            "user": {"id_str": "7", "screen_name": "someone"}
        })
    }

    async fn pipeline(options: PipelineOptions) -> (Arc<MemoryStore>, Pipeline) {
        let memory = Arc::new(MemoryStore::new());
        let store = ContentStore::open(memory.clone()).await.unwrap();
        (memory, Pipeline::new(store, options))
    }

    #[tokio::test]
    async fn saves_normalized_content() {
        let (_, pipeline) = pipeline(PipelineOptions::default()).await;
        let raw = item();
        let record = serde_json::from_value(raw.clone()).unwrap();

        let outcome = pipeline.process(record, &raw).await;

        assert_eq!(
            outcome,
            ItemOutcome::Saved(SaveSummary {
                content_written: 1,
                authors_created: 1
            })
        );
        let doc = pipeline.store().get("42").await.unwrap().unwrap();
        assert!(doc.get("filter_level").is_none());
    }

    #[tokio::test]
    async fn raw_mode_keeps_unknown_fields() {
        let options = PipelineOptions {
            save_raw: true,
            ..Default::default()
        };
        let (_, pipeline) = pipeline(options).await;
        let raw = item();
        let record = serde_json::from_value(raw.clone()).unwrap();

        pipeline.process(record, &raw).await;

        let doc = pipeline.store().get("42").await.unwrap().unwrap();
        assert_eq!(doc["filter_level"], "low");
    }

    #[tokio::test]
    async fn unavailable_store_fails_the_item() {
        let (memory, pipeline) = pipeline(PipelineOptions::default()).await;
        memory.set_available(false);
        let raw = item();
        let record = serde_json::from_value(raw.clone()).unwrap();

        assert_eq!(pipeline.process(record, &raw).await, ItemOutcome::Failed);
    }
}
