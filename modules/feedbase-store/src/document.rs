//! Document-store abstraction.
//!
//! Documents are schemaless JSON objects with one reserved identity field
//! (`_id`) and one reserved type tag (`type`). Indexes are declared as views
//! (see [`crate::views`]) and registered once per process start.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::views::ViewDefinition;

/// Reserved identity field.
pub const ID_FIELD: &str = "_id";
/// Revision field maintained by the backend. Never written by callers.
pub const REV_FIELD: &str = "_rev";
/// Reserved type tag field.
pub const TYPE_FIELD: &str = "type";

/// Options for reading rows from an ordered view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewQuery {
    /// Inclusive lower bound on the row key.
    pub start_key: Option<String>,
    /// Inclusive upper bound on the row key.
    pub end_key: Option<String>,
    pub limit: Option<usize>,
    pub descending: bool,
    /// Attach the full document to each row.
    pub include_docs: bool,
}

impl ViewQuery {
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn include_docs(mut self) -> Self {
        self.include_docs = true;
        self
    }

    pub fn range(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start_key = Some(start.into());
        self.end_key = Some(end.into());
        self
    }
}

/// One emitted row of a view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRow {
    /// Identity of the document that emitted the row.
    pub id: String,
    pub key: String,
    pub value: Value,
    pub doc: Option<Value>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the database if it does not exist yet.
    async fn ensure_database(&self) -> Result<()>;

    /// Register view definitions under a design name. Idempotent: unchanged
    /// definitions are left alone, changed ones replace the stored ones.
    async fn sync_views(&self, design: &str, views: &[ViewDefinition]) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Value>>;

    /// Write a document, replacing any existing document with the same
    /// identity (last write wins).
    async fn put(&self, doc: Value) -> Result<()>;

    /// Delete by identity. Returns false if nothing was stored under `id`.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn query_view(&self, design: &str, view: &str, query: &ViewQuery)
        -> Result<Vec<ViewRow>>;

    /// Reduced value of a view grouped on one exact key. Zero when no row
    /// carries the key.
    async fn reduce_view(&self, design: &str, view: &str, key: &str) -> Result<u64>;

    /// Reclaim space left by deletions. Never changes query results.
    async fn compact(&self) -> Result<()>;

    /// Drop the whole database.
    async fn destroy(&self) -> Result<()>;
}

/// Identity of a document, or an error if it has none.
pub fn document_id(doc: &Value) -> Result<&str> {
    doc.get(ID_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidDocument(format!("missing {ID_FIELD}")))
}

/// Type tag of a document, if any.
pub fn document_type(doc: &Value) -> Option<&str> {
    doc.get(TYPE_FIELD).and_then(Value::as_str)
}
