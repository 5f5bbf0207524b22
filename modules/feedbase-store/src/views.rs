//! Declarative index definitions.
//!
//! Every view exists twice: as JavaScript for a CouchDB design document and
//! as the equivalent Rust map function, which the in-process store runs.
//! Both derive rows purely from document contents, so an index can always be
//! rebuilt from the documents alone.

use serde_json::{json, Value};

use feedbase_common::{chronological_key, parse_created_at, RecordId};

use crate::document::document_type;

/// Design document that holds all views.
pub const DESIGN: &str = "twitter";

/// Type tag of content documents.
pub const CONTENT_TYPE: &str = "TWITTER_STATUS";
/// Type tag of author documents.
pub const AUTHOR_TYPE: &str = "TWITTER_USER";

/// Count of documents per type tag.
pub const COUNT_TYPE: &str = "count_type";
/// Content ordered by padded id.
pub const CONTENT_BY_ID: &str = "get_tweets";
/// Content ordered by creation time, then padded id.
pub const CONTENT_BY_DATE: &str = "get_tweets_by_date";
/// Authors ordered by padded id.
pub const AUTHORS_BY_ID: &str = "get_users";

/// Built-in reduce functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduce {
    Count,
    Sum,
}

impl Reduce {
    /// Name of the backend's built-in reduce function.
    pub fn builtin(self) -> &'static str {
        match self {
            Reduce::Count => "_count",
            Reduce::Sum => "_sum",
        }
    }
}

#[derive(Clone, Copy)]
pub struct ViewDefinition {
    pub name: &'static str,
    /// JavaScript map function registered with the document database.
    pub map_source: &'static str,
    pub reduce: Option<Reduce>,
    /// Rust equivalent of `map_source`. Returns the `(key, value)` rows
    /// emitted for one document.
    pub map: fn(&Value) -> Vec<(String, Value)>,
}

impl std::fmt::Debug for ViewDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewDefinition")
            .field("name", &self.name)
            .field("reduce", &self.reduce)
            .finish()
    }
}

impl ViewDefinition {
    /// Design-document entry for this view.
    pub fn to_design_entry(&self) -> Value {
        match self.reduce {
            Some(reduce) => json!({"map": self.map_source, "reduce": reduce.builtin()}),
            None => json!({"map": self.map_source}),
        }
    }
}

/// All views the storage layer depends on.
pub fn definitions() -> Vec<ViewDefinition> {
    vec![
        ViewDefinition {
            name: COUNT_TYPE,
            map_source: "function(doc) { if (doc.type) emit(doc.type, 1); }",
            reduce: Some(Reduce::Count),
            map: count_type,
        },
        ViewDefinition {
            name: CONTENT_BY_ID,
            map_source: r#"function(doc) { if (doc.type == "TWITTER_STATUS") emit(("0000000000000000000"+(doc.id_str || doc.id)).slice(-19), null); }"#,
            reduce: None,
            map: content_by_id,
        },
        ViewDefinition {
            name: CONTENT_BY_DATE,
            map_source: r#"function(doc) { if (doc.type == "TWITTER_STATUS") { var t = new Date(doc.created_at).getTime(); if (isNaN(t) || t < 0) t = 0; emit(("0000000000000"+t).slice(-13)+"-"+("0000000000000000000"+(doc.id_str || doc.id)).slice(-19), null); } }"#,
            reduce: None,
            map: content_by_date,
        },
        ViewDefinition {
            name: AUTHORS_BY_ID,
            map_source: r#"function(doc) { if (doc.type == "TWITTER_USER") emit(("0000000000000000000"+(doc.id_str || doc.id)).slice(-19), null); }"#,
            reduce: None,
            map: authors_by_id,
        },
    ]
}

fn count_type(doc: &Value) -> Vec<(String, Value)> {
    match document_type(doc) {
        Some(tag) => vec![(tag.to_string(), json!(1))],
        None => Vec::new(),
    }
}

fn content_by_id(doc: &Value) -> Vec<(String, Value)> {
    if document_type(doc) != Some(CONTENT_TYPE) {
        return Vec::new();
    }
    match record_id(doc) {
        Some(id) => vec![(id.padded(), Value::Null)],
        None => Vec::new(),
    }
}

fn content_by_date(doc: &Value) -> Vec<(String, Value)> {
    if document_type(doc) != Some(CONTENT_TYPE) {
        return Vec::new();
    }
    let Some(id) = record_id(doc) else {
        return Vec::new();
    };
    // Unparseable timestamps sort first, so retention can still reach them.
    let created_at = doc
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|raw| parse_created_at(raw).ok())
        .unwrap_or_default();
    vec![(chronological_key(created_at, id.value()), Value::Null)]
}

fn authors_by_id(doc: &Value) -> Vec<(String, Value)> {
    if document_type(doc) != Some(AUTHOR_TYPE) {
        return Vec::new();
    }
    match record_id(doc) {
        Some(id) => vec![(id.padded(), Value::Null)],
        None => Vec::new(),
    }
}

/// The `id` field, whether stored as a string or a number. Raw documents
/// keep the feed's numeric `id`, so `id_str` is preferred when present.
fn record_id(doc: &Value) -> Option<RecordId> {
    let field = doc.get("id_str").or_else(|| doc.get("id"))?;
    serde_json::from_value(field.clone()).ok()
}
