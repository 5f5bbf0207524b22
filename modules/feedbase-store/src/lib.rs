//! Persistence for feed content.
//!
//! [`ContentStore`] sits on any [`DocumentStore`]: the CouchDB HTTP backend
//! for real deployments or [`MemoryStore`] for tests and dry runs. Both serve
//! the same view definitions, so ordering and counts behave identically.

pub mod couch;
pub mod document;
pub mod error;
pub mod mapper;
pub mod memory;
pub mod retention;
pub mod store;
pub mod views;

use std::sync::Arc;

pub use couch::CouchStore;
pub use document::{DocumentStore, ViewQuery, ViewRow};
pub use error::{Result, StoreError};
pub use mapper::{
    author_doc_id, map_content, AuthorDocument, ContentBody, ContentDocument, MappedContent,
};
pub use memory::MemoryStore;
pub use retention::RetentionReport;
pub use store::{ContentStore, PruneOrder, SaveSummary};

/// Store URL that selects the in-process backend.
pub const MEMORY_URL: &str = "memory:";

/// Backend for a store URL: `memory:` or a CouchDB server root.
pub fn connect(url: &str, database: &str) -> Result<Arc<dyn DocumentStore>> {
    if url == MEMORY_URL {
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(CouchStore::new(url, database)?))
}
