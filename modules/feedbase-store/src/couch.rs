//! CouchDB backend over its HTTP API.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use url::Url;

use crate::document::{document_id, DocumentStore, ViewQuery, ViewRow, ID_FIELD, REV_FIELD};
use crate::error::{Result, StoreError};
use crate::views::ViewDefinition;

const DEFAULT_URL: &str = "http://127.0.0.1:5984";

/// Attempts at a write that keeps losing revision races.
const MAX_PUT_ATTEMPTS: usize = 3;

#[derive(Debug, Deserialize)]
struct ViewResponse {
    #[serde(default)]
    rows: Vec<RawRow>,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    id: Option<String>,
    key: Value,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    doc: Option<Value>,
}

pub struct CouchStore {
    client: reqwest::Client,
    server: Url,
    database: String,
}

impl CouchStore {
    /// `server` is the server root (credentials may be embedded in the URL).
    pub fn new(server: &str, database: impl Into<String>) -> Result<Self> {
        let server = Url::parse(if server.is_empty() { DEFAULT_URL } else { server })
            .map_err(|e| StoreError::Unavailable(format!("invalid store url {server}: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            server,
            database: database.into(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.server.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| StoreError::Unavailable(format!("{} cannot be a base", self.server)))?;
            path.pop_if_empty().push(&self.database);
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url.clone());
        match url.password() {
            Some(password) => builder.basic_auth(url.username(), Some(password)),
            None => builder,
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Backend {
            status: status.as_u16(),
            message: body,
        })
    }

    async fn current_rev(&self, segments: &[&str]) -> Result<Option<String>> {
        let resp = self.request(Method::GET, self.url(segments)?).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc: Value = Self::check(resp).await?.json().await?;
        Ok(doc.get(REV_FIELD).and_then(Value::as_str).map(String::from))
    }

    async fn put_at(&self, segments: &[&str], mut doc: Map<String, Value>) -> Result<()> {
        for attempt in 1..=MAX_PUT_ATTEMPTS {
            match self.current_rev(segments).await? {
                Some(rev) => doc.insert(REV_FIELD.to_string(), Value::String(rev)),
                None => doc.remove(REV_FIELD),
            };
            let resp = self
                .request(Method::PUT, self.url(segments)?)
                .json(&doc)
                .send()
                .await?;
            if resp.status() == StatusCode::CONFLICT && attempt < MAX_PUT_ATTEMPTS {
                tracing::debug!(path = ?segments, attempt, "Revision conflict, retrying");
                continue;
            }
            Self::check(resp).await?;
            return Ok(());
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for CouchStore {
    async fn ensure_database(&self) -> Result<()> {
        let resp = self.request(Method::PUT, self.url(&[])?).send().await?;
        if resp.status() == StatusCode::PRECONDITION_FAILED {
            tracing::debug!(database = %self.database, "Database exists");
            return Ok(());
        }
        Self::check(resp).await?;
        tracing::info!(database = %self.database, "Created database");
        Ok(())
    }

    async fn sync_views(&self, design: &str, views: &[ViewDefinition]) -> Result<()> {
        let segments = ["_design", design];
        let resp = self.request(Method::GET, self.url(&segments)?).send().await?;
        let existing: Option<Value> = if resp.status() == StatusCode::NOT_FOUND {
            None
        } else {
            Some(Self::check(resp).await?.json().await?)
        };

        let wanted: Map<String, Value> = views
            .iter()
            .map(|v| (v.name.to_string(), v.to_design_entry()))
            .collect();
        let mut doc = existing
            .and_then(|d| d.as_object().cloned())
            .unwrap_or_default();

        let current = doc.get("views").and_then(Value::as_object);
        let unchanged = current.is_some_and(|current| {
            wanted.iter().all(|(name, entry)| current.get(name) == Some(entry))
        });
        if unchanged {
            return Ok(());
        }

        let mut merged = current.cloned().unwrap_or_default();
        merged.extend(wanted);
        doc.insert(ID_FIELD.to_string(), json!(format!("_design/{design}")));
        doc.insert("language".to_string(), json!("javascript"));
        doc.insert("views".to_string(), Value::Object(merged));

        self.put_at(&segments, doc).await?;
        tracing::info!(database = %self.database, design, "Registered views");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Value>> {
        let resp = self.request(Method::GET, self.url(&[id])?).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::check(resp).await?.json().await?))
    }

    async fn put(&self, doc: Value) -> Result<()> {
        let id = document_id(&doc)?.to_string();
        let Value::Object(doc) = doc else {
            return Err(StoreError::InvalidDocument(format!("{id} is not an object")));
        };
        self.put_at(&[id.as_str()], doc).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let Some(rev) = self.current_rev(&[id]).await? else {
            return Ok(false);
        };
        let mut url = self.url(&[id])?;
        url.query_pairs_mut().append_pair("rev", &rev);
        let resp = self.request(Method::DELETE, url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(resp).await?;
        Ok(true)
    }

    async fn query_view(
        &self,
        design: &str,
        view: &str,
        query: &ViewQuery,
    ) -> Result<Vec<ViewRow>> {
        let mut url = self.url(&["_design", design, "_view", view])?;
        {
            // Descending scans start from the upper bound.
            let (start, end) = if query.descending {
                (&query.end_key, &query.start_key)
            } else {
                (&query.start_key, &query.end_key)
            };
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("reduce", "false");
            if let Some(start) = start {
                pairs.append_pair("startkey", &Value::String(start.clone()).to_string());
            }
            if let Some(end) = end {
                pairs.append_pair("endkey", &Value::String(end.clone()).to_string());
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
            if query.descending {
                pairs.append_pair("descending", "true");
            }
            if query.include_docs {
                pairs.append_pair("include_docs", "true");
            }
        }

        let resp = self.request(Method::GET, url).send().await?;
        let body: ViewResponse = Self::check(resp).await?.json().await?;
        Ok(body
            .rows
            .into_iter()
            .map(|row| ViewRow {
                id: row.id.unwrap_or_default(),
                key: match row.key {
                    Value::String(key) => key,
                    other => other.to_string(),
                },
                value: row.value,
                doc: row.doc,
            })
            .collect())
    }

    async fn reduce_view(&self, design: &str, view: &str, key: &str) -> Result<u64> {
        let mut url = self.url(&["_design", design, "_view", view])?;
        url.query_pairs_mut()
            .append_pair("key", &Value::String(key.to_string()).to_string())
            .append_pair("group", "true");

        let resp = self.request(Method::GET, url).send().await?;
        let body: ViewResponse = Self::check(resp).await?.json().await?;
        Ok(body
            .rows
            .first()
            .and_then(|row| row.value.as_u64())
            .unwrap_or(0))
    }

    async fn compact(&self) -> Result<()> {
        for endpoint in ["_compact", "_view_cleanup"] {
            let resp = self
                .request(Method::POST, self.url(&[endpoint])?)
                .json(&json!({}))
                .send()
                .await?;
            Self::check(resp).await?;
        }
        tracing::info!(database = %self.database, "Compaction requested");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let resp = self.request(Method::DELETE, self.url(&[])?).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(resp).await?;
        tracing::info!(database = %self.database, "Deleted database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_escaped_document_urls() {
        let store = CouchStore::new("http://127.0.0.1:5984/", "tw_test").unwrap();
        assert_eq!(
            store.url(&["_design", "twitter", "_view", "get_tweets"]).unwrap().as_str(),
            "http://127.0.0.1:5984/tw_test/_design/twitter/_view/get_tweets"
        );
        assert_eq!(
            store.url(&["a/b"]).unwrap().as_str(),
            "http://127.0.0.1:5984/tw_test/a%2Fb"
        );
    }

    #[test]
    fn empty_url_uses_local_server() {
        let store = CouchStore::new("", "db").unwrap();
        assert_eq!(store.url(&[]).unwrap().as_str(), "http://127.0.0.1:5984/db");
    }

    #[test]
    fn rejects_garbage_url() {
        assert!(CouchStore::new("not a url", "db").is_err());
    }
}
