// Storage layer over a document store. Owns document identity, the
// create-once author rule and the additive repost back-references.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use feedbase_common::{ContentRecord, RecordId};

use crate::document::{DocumentStore, ViewQuery, REV_FIELD};
use crate::error::Result;
use crate::mapper::{author_doc_id, map_content, AuthorDocument, ContentBody, MappedContent};
use crate::views::{
    definitions, AUTHORS_BY_ID, AUTHOR_TYPE, CONTENT_BY_DATE, CONTENT_BY_ID, CONTENT_TYPE,
    COUNT_TYPE, DESIGN,
};

/// Field holding the ids of content that reposted a document.
const BACK_REFERENCES: &str = "retweeted_by_list";

/// Which index decides the oldest content when pruning or listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PruneOrder {
    /// Zero-padded id.
    #[default]
    Identity,
    /// Creation time, then zero-padded id.
    Chronological,
}

impl PruneOrder {
    pub fn view(self) -> &'static str {
        match self {
            PruneOrder::Identity => CONTENT_BY_ID,
            PruneOrder::Chronological => CONTENT_BY_DATE,
        }
    }
}

/// What one `save_content` call wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub content_written: usize,
    pub authors_created: usize,
}

#[derive(Clone)]
pub struct ContentStore {
    docs: Arc<dyn DocumentStore>,
    prune_order: PruneOrder,
}

impl ContentStore {
    /// Create the database if needed and register the views.
    pub async fn open(docs: Arc<dyn DocumentStore>) -> Result<Self> {
        docs.ensure_database().await?;
        docs.sync_views(DESIGN, &definitions()).await?;
        Ok(Self {
            docs,
            prune_order: PruneOrder::default(),
        })
    }

    pub fn with_prune_order(mut self, order: PruneOrder) -> Self {
        self.prune_order = order;
        self
    }

    pub fn prune_order(&self) -> PruneOrder {
        self.prune_order
    }

    pub fn backend(&self) -> &Arc<dyn DocumentStore> {
        &self.docs
    }

    // --- Writes ---

    /// Persist a content record, its author, and (when `follow_reposts` is
    /// set) the chain of originals it reposts. Originals are written first;
    /// each original gains the reposting id in its back-reference list.
    ///
    /// `raw` carries the original feed item when content is stored as-is.
    pub async fn save_content(
        &self,
        record: &ContentRecord,
        follow_reposts: bool,
        raw: Option<&Value>,
    ) -> Result<SaveSummary> {
        let mapped = map_content(record, raw, follow_reposts)?;
        self.save_mapped(mapped).await
    }

    /// Persist an already mapped chain.
    pub async fn save_mapped(&self, mapped: MappedContent) -> Result<SaveSummary> {
        // Flatten child -> parent links into an oldest-first list.
        let mut chain = Vec::with_capacity(mapped.chain_len());
        let mut next = Some(Box::new(mapped));
        while let Some(mut node) = next {
            next = node.parent.take();
            chain.push(*node);
        }

        let mut summary = SaveSummary::default();
        for index in (0..chain.len()).rev() {
            let reposted_by = index.checked_sub(1).map(|child| chain[child].id);
            let node = &chain[index];

            if self.save_author(&node.author).await? {
                summary.authors_created += 1;
            }
            self.write_content(node, reposted_by).await?;
            summary.content_written += 1;
        }
        Ok(summary)
    }

    async fn write_content(&self, node: &MappedContent, reposted_by: Option<RecordId>) -> Result<()> {
        let references = match node.content {
            ContentBody::Normalized(_) => {
                let existing = self.docs.get(&node.id.to_string()).await?;
                let mut references = existing
                    .as_ref()
                    .map(back_references)
                    .unwrap_or_default();
                if let Some(child) = reposted_by {
                    if !references.contains(&child) {
                        references.push(child);
                    }
                }
                Some(references)
            }
            ContentBody::Raw(_) => None,
        };

        let mut doc = node.content.to_value()?;
        if let Some(obj) = doc.as_object_mut() {
            obj.remove(REV_FIELD);
            if let Some(references) = references {
                obj.insert(BACK_REFERENCES.to_string(), serde_json::to_value(references)?);
            }
        }

        debug!(id = %node.id, reposted_by = ?reposted_by, "Writing content");
        self.docs.put(doc).await
    }

    /// Write an author unless one with the same id exists. Returns whether a
    /// document was created.
    pub async fn save_author(&self, author: &AuthorDocument) -> Result<bool> {
        if self.docs.get(&author.doc_id).await?.is_some() {
            return Ok(false);
        }
        self.docs.put(serde_json::to_value(author)?).await?;
        debug!(id = %author.id, screen_name = %author.screen_name, "Created author");
        Ok(true)
    }

    // --- Counts ---

    pub async fn content_count(&self) -> Result<u64> {
        self.docs.reduce_view(DESIGN, COUNT_TYPE, CONTENT_TYPE).await
    }

    pub async fn author_count(&self) -> Result<u64> {
        self.docs.reduce_view(DESIGN, COUNT_TYPE, AUTHOR_TYPE).await
    }

    // --- Maintenance ---

    /// Delete the `count` oldest content documents in the configured order.
    /// Returns how many were deleted.
    pub async fn prune_oldest(&self, count: u64) -> Result<u64> {
        if count == 0 {
            return Ok(0);
        }
        let limit = usize::try_from(count).unwrap_or(usize::MAX);
        let rows = self
            .docs
            .query_view(DESIGN, self.prune_order.view(), &ViewQuery::default().limit(limit))
            .await?;

        let mut deleted = 0;
        for row in rows {
            if self.docs.delete(&row.id).await? {
                deleted += 1;
            }
        }
        info!(requested = count, deleted, order = ?self.prune_order, "Pruned content");
        Ok(deleted)
    }

    pub async fn compact(&self) -> Result<()> {
        self.docs.compact().await
    }

    /// Drop the whole database.
    pub async fn destroy(&self) -> Result<()> {
        self.docs.destroy().await
    }

    // --- Reads ---

    pub async fn get(&self, id: &str) -> Result<Option<Value>> {
        self.docs.get(id).await
    }

    pub async fn get_author(&self, id: RecordId) -> Result<Option<Value>> {
        self.docs.get(&author_doc_id(id)).await
    }

    /// Stored content documents, oldest first in the given order.
    pub async fn list_content(&self, order: PruneOrder, limit: Option<usize>) -> Result<Vec<Value>> {
        let mut query = ViewQuery::default().include_docs();
        query.limit = limit;
        let rows = self.docs.query_view(DESIGN, order.view(), &query).await?;
        Ok(rows.into_iter().filter_map(|row| row.doc).collect())
    }

    /// Stored author documents ordered by id.
    pub async fn list_authors(&self, limit: Option<usize>) -> Result<Vec<Value>> {
        let mut query = ViewQuery::default().include_docs();
        query.limit = limit;
        let rows = self.docs.query_view(DESIGN, AUTHORS_BY_ID, &query).await?;
        Ok(rows.into_iter().filter_map(|row| row.doc).collect())
    }
}

fn back_references(doc: &Value) -> Vec<RecordId> {
    doc.get(BACK_REFERENCES)
        .cloned()
        .and_then(|list| serde_json::from_value(list).ok())
        .unwrap_or_default()
}
