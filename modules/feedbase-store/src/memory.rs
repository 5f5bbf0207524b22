//! In-process document store.
//!
//! Keeps documents in memory and maintains each registered view
//! incrementally, the way the document database does: every write re-runs
//! the view's map function for that one document. Reduced values are kept
//! per key, so counts never scan documents.
//!
//! Used by tests and by `--store-url memory:` for dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::document::{document_id, DocumentStore, ViewQuery, ViewRow, REV_FIELD};
use crate::error::{Result, StoreError};
use crate::views::{Reduce, ViewDefinition};

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    available: AtomicBool,
    compactions: AtomicUsize,
}

#[derive(Default)]
struct MemoryState {
    docs: BTreeMap<String, Value>,
    revisions: HashMap<String, u64>,
    /// Keyed by `design/view`.
    views: HashMap<String, ViewIndex>,
}

struct ViewIndex {
    definition: ViewDefinition,
    /// `(key, doc id) -> value`, in key order.
    rows: BTreeMap<(String, String), Value>,
    /// Keys each document emitted, for removal on update or delete.
    emitted: HashMap<String, Vec<String>>,
    /// Reduced value per key.
    reduced: HashMap<String, u64>,
}

impl ViewIndex {
    fn build(definition: ViewDefinition, docs: &BTreeMap<String, Value>) -> Self {
        let mut index = Self {
            definition,
            rows: BTreeMap::new(),
            emitted: HashMap::new(),
            reduced: HashMap::new(),
        };
        for (id, doc) in docs {
            index.add(id, doc);
        }
        index
    }

    fn add(&mut self, id: &str, doc: &Value) {
        let rows = (self.definition.map)(doc);
        let mut keys = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            if let Some(reduce) = self.definition.reduce {
                *self.reduced.entry(key.clone()).or_insert(0) += reduced_value(reduce, &value);
            }
            keys.push(key.clone());
            self.rows.insert((key, id.to_string()), value);
        }
        if !keys.is_empty() {
            self.emitted.insert(id.to_string(), keys);
        }
    }

    fn remove(&mut self, id: &str) {
        let Some(keys) = self.emitted.remove(id) else {
            return;
        };
        for key in keys {
            let Some(value) = self.rows.remove(&(key.clone(), id.to_string())) else {
                continue;
            };
            if let Some(reduce) = self.definition.reduce {
                if let Some(total) = self.reduced.get_mut(&key) {
                    *total = total.saturating_sub(reduced_value(reduce, &value));
                    if *total == 0 {
                        self.reduced.remove(&key);
                    }
                }
            }
        }
    }

    fn is_same_definition(&self, other: &ViewDefinition) -> bool {
        self.definition.map_source == other.map_source && self.definition.reduce == other.reduce
    }
}

fn reduced_value(reduce: Reduce, value: &Value) -> u64 {
    match reduce {
        Reduce::Count => 1,
        Reduce::Sum => value.as_u64().unwrap_or(0),
    }
}

fn view_path(design: &str, view: &str) -> String {
    format!("{design}/{view}")
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            available: AtomicBool::new(true),
            compactions: AtomicUsize::new(0),
        }
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of completed compactions.
    pub fn compactions(&self) -> usize {
        self.compactions.load(Ordering::SeqCst)
    }

    /// Number of stored documents of any type.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ensure_database(&self) -> Result<()> {
        self.check_available()
    }

    async fn sync_views(&self, design: &str, views: &[ViewDefinition]) -> Result<()> {
        self.check_available()?;
        let mut state = self.lock()?;
        for definition in views {
            let path = view_path(design, definition.name);
            let unchanged = state
                .views
                .get(&path)
                .is_some_and(|index| index.is_same_definition(definition));
            if unchanged {
                continue;
            }
            let index = ViewIndex::build(*definition, &state.docs);
            state.views.insert(path, index);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Value>> {
        self.check_available()?;
        Ok(self.lock()?.docs.get(id).cloned())
    }

    async fn put(&self, mut doc: Value) -> Result<()> {
        self.check_available()?;
        let id = document_id(&doc)?.to_string();
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidDocument(format!("{id} is not an object")))?;

        let mut state = self.lock()?;
        let revision = state.revisions.entry(id.clone()).or_insert(0);
        *revision += 1;
        obj.insert(REV_FIELD.to_string(), Value::String(format!("{revision}-mem")));

        for index in state.views.values_mut() {
            index.remove(&id);
            index.add(&id, &doc);
        }
        state.docs.insert(id, doc);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.check_available()?;
        let mut state = self.lock()?;
        if state.docs.remove(id).is_none() {
            return Ok(false);
        }
        for index in state.views.values_mut() {
            index.remove(id);
        }
        Ok(true)
    }

    async fn query_view(
        &self,
        design: &str,
        view: &str,
        query: &ViewQuery,
    ) -> Result<Vec<ViewRow>> {
        self.check_available()?;
        let state = self.lock()?;
        let index = state
            .views
            .get(&view_path(design, view))
            .ok_or_else(|| StoreError::Backend {
                status: 404,
                message: format!("missing view {design}/{view}"),
            })?;

        let in_range = |key: &String| {
            query.start_key.as_ref().map_or(true, |start| key >= start)
                && query.end_key.as_ref().map_or(true, |end| key <= end)
        };
        let to_row = |((key, id), value): (&(String, String), &Value)| ViewRow {
            id: id.clone(),
            key: key.clone(),
            value: value.clone(),
            doc: if query.include_docs {
                state.docs.get(id).cloned()
            } else {
                None
            },
        };
        let limit = query.limit.unwrap_or(usize::MAX);

        let rows = if query.descending {
            index
                .rows
                .iter()
                .rev()
                .filter(|((key, _), _)| in_range(key))
                .take(limit)
                .map(to_row)
                .collect()
        } else {
            index
                .rows
                .iter()
                .filter(|((key, _), _)| in_range(key))
                .take(limit)
                .map(to_row)
                .collect()
        };
        Ok(rows)
    }

    async fn reduce_view(&self, design: &str, view: &str, key: &str) -> Result<u64> {
        self.check_available()?;
        let state = self.lock()?;
        let index = state
            .views
            .get(&view_path(design, view))
            .ok_or_else(|| StoreError::Backend {
                status: 404,
                message: format!("missing view {design}/{view}"),
            })?;
        if index.definition.reduce.is_none() {
            return Err(StoreError::Backend {
                status: 400,
                message: format!("{design}/{view} has no reduce function"),
            });
        }
        Ok(index.reduced.get(key).copied().unwrap_or(0))
    }

    async fn compact(&self) -> Result<()> {
        self.check_available()?;
        self.compactions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.check_available()?;
        let mut state = self.lock()?;
        state.docs.clear();
        state.revisions.clear();
        for index in state.views.values_mut() {
            index.rows.clear();
            index.emitted.clear();
            index.reduced.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::{definitions, AUTHOR_TYPE, CONTENT_BY_ID, CONTENT_TYPE, COUNT_TYPE, DESIGN};
    use serde_json::json;

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.sync_views(DESIGN, &definitions()).await.unwrap();
        store
    }

    fn content(id: u64) -> Value {
        json!({"_id": id.to_string(), "type": CONTENT_TYPE, "id": id.to_string()})
    }

    #[tokio::test]
    async fn count_follows_writes_and_deletes() {
        let store = store().await;
        store.put(content(1)).await.unwrap();
        store.put(content(2)).await.unwrap();
        store.put(content(2)).await.unwrap();
        store
            .put(json!({"_id": "9", "type": AUTHOR_TYPE, "id": "9"}))
            .await
            .unwrap();

        assert_eq!(store.reduce_view(DESIGN, COUNT_TYPE, CONTENT_TYPE).await.unwrap(), 2);
        assert_eq!(store.reduce_view(DESIGN, COUNT_TYPE, AUTHOR_TYPE).await.unwrap(), 1);

        assert!(store.delete("1").await.unwrap());
        assert!(!store.delete("1").await.unwrap());
        assert_eq!(store.reduce_view(DESIGN, COUNT_TYPE, CONTENT_TYPE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn views_registered_late_index_existing_documents() {
        let store = MemoryStore::new();
        store.put(content(12)).await.unwrap();
        store.put(content(7)).await.unwrap();
        store.sync_views(DESIGN, &definitions()).await.unwrap();

        let rows = store
            .query_view(DESIGN, CONTENT_BY_ID, &ViewQuery::default())
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["7", "12"]);
    }

    #[tokio::test]
    async fn query_limit_descending_and_docs() {
        let store = store().await;
        for id in [5, 50, 500] {
            store.put(content(id)).await.unwrap();
        }
        let rows = store
            .query_view(
                DESIGN,
                CONTENT_BY_ID,
                &ViewQuery::default().limit(2).descending().include_docs(),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "500");
        assert_eq!(rows[1].id, "50");
        assert_eq!(rows[0].doc.as_ref().unwrap()["id"], json!("500"));
    }

    #[tokio::test]
    async fn put_assigns_revisions() {
        let store = store().await;
        store.put(content(3)).await.unwrap();
        store.put(content(3)).await.unwrap();
        let doc = store.get("3").await.unwrap().unwrap();
        assert_eq!(doc[REV_FIELD], json!("2-mem"));
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = store().await;
        store.set_available(false);
        let err = store.put(content(1)).await.unwrap_err();
        assert!(err.is_unavailable());
        store.set_available(true);
        store.put(content(1)).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_view_is_an_error() {
        let store = MemoryStore::new();
        let err = store
            .query_view(DESIGN, "nope", &ViewQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend { status: 404, .. }));
    }
}
