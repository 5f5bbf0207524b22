//! Projection of decoded feed records onto stored documents.
//!
//! Pure: no I/O. A content record becomes one content document holding only
//! its author's id, one author document, and (when reposts are followed) the
//! mapped original it reposts.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use feedbase_common::{Author, ContentRecord, GeocodeStrategy, Place, RecordId};

use crate::document::{ID_FIELD, TYPE_FIELD};
use crate::error::{Result, StoreError};
use crate::views::{AUTHOR_TYPE, CONTENT_TYPE};

/// Deepest repost chain that will be followed.
pub const MAX_REPOST_DEPTH: usize = 16;

// --- Documents ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDocument {
    #[serde(rename = "_id")]
    pub doc_id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub id: RecordId,
    pub created_at: String,
    pub text: String,
    pub lang: Option<String>,
    /// `[longitude, latitude]`.
    pub coordinates: Option<[f64; 2]>,
    pub place: Option<Place>,
    pub user_id: RecordId,
    pub retweeted_status_id: Option<RecordId>,
    /// Ids of stored content that reposted this one.
    #[serde(default)]
    pub retweeted_by_list: Vec<RecordId>,
    pub entities: Option<Value>,
    pub retweet_count: u64,
    pub favorite_count: u64,
    pub source: Option<String>,
    pub in_reply_to_status_id: Option<RecordId>,
    pub in_reply_to_user_id: Option<RecordId>,
    pub in_reply_to_screen_name: Option<String>,
    pub truncated: bool,
    pub geocoder: GeocodeStrategy,
}

impl ContentDocument {
    pub fn from_record(record: &ContentRecord) -> Self {
        Self {
            doc_id: record.id.to_string(),
            doc_type: CONTENT_TYPE.to_string(),
            id: record.id,
            created_at: record.created_at.clone(),
            text: record.text.clone(),
            lang: record.language.clone(),
            coordinates: record.coordinates.as_ref().map(|c| c.coordinates),
            place: record.place.clone(),
            user_id: record.author.id,
            retweeted_status_id: record.repost_of.as_ref().map(|original| original.id),
            retweeted_by_list: Vec::new(),
            entities: record.entities.clone(),
            retweet_count: record.metrics.retweet_count,
            favorite_count: record.metrics.favorite_count,
            source: record.source_client.clone(),
            in_reply_to_status_id: record.reply_context.status_id,
            in_reply_to_user_id: record.reply_context.user_id,
            in_reply_to_screen_name: record.reply_context.screen_name.clone(),
            truncated: record.truncated,
            geocoder: record.geocode_strategy,
        }
    }
}

/// Prefix of author identities. Content keeps the bare decimal id, so a user
/// and a status sharing a number never collide.
pub const AUTHOR_ID_PREFIX: &str = "user:";

/// Document identity of the author with feed id `id`.
pub fn author_doc_id(id: RecordId) -> String {
    format!("{AUTHOR_ID_PREFIX}{id}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorDocument {
    #[serde(rename = "_id")]
    pub doc_id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub id: RecordId,
    pub screen_name: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub followers_count: u64,
    pub friends_count: u64,
    pub favourites_count: u64,
    pub statuses_count: u64,
    pub lang: Option<String>,
    pub utc_offset: Option<i64>,
    pub verified: bool,
    pub geo_enabled: bool,
    pub profile_image_url: Option<String>,
    pub url: Option<String>,
    pub entities: Option<Value>,
    pub created_at: Option<String>,
}

impl AuthorDocument {
    pub fn from_author(author: &Author) -> Self {
        Self {
            doc_id: author_doc_id(author.id),
            doc_type: AUTHOR_TYPE.to_string(),
            id: author.id,
            screen_name: author.handle.clone(),
            name: author.display_name.clone(),
            description: author.description.clone(),
            location: author.location.clone(),
            followers_count: author.follower_count,
            friends_count: author.friend_count,
            favourites_count: author.favorite_count,
            statuses_count: author.status_count,
            lang: author.language.clone(),
            utc_offset: author.utc_offset_seconds,
            verified: author.verified,
            geo_enabled: author.geo_enabled,
            profile_image_url: author.profile_image_url.clone(),
            url: author.url.clone(),
            entities: author.entities.clone(),
            created_at: author.created_at.clone(),
        }
    }
}

/// Stored form of a content record.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBody {
    Normalized(ContentDocument),
    /// The original feed item with identity and type tag added.
    Raw(Value),
}

impl ContentBody {
    pub fn to_value(&self) -> Result<Value> {
        match self {
            ContentBody::Normalized(doc) => Ok(serde_json::to_value(doc)?),
            ContentBody::Raw(value) => Ok(value.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappedContent {
    pub id: RecordId,
    pub content: ContentBody,
    pub author: AuthorDocument,
    /// Mapped original when this record is a followed repost.
    pub parent: Option<Box<MappedContent>>,
}

impl MappedContent {
    /// Number of documents in the chain, this one included.
    pub fn chain_len(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |p| p.chain_len())
    }
}

// --- Mapping ---

/// Map a record and, when `follow_reposts` is set, the chain of originals it
/// reposts. When `raw` carries the original feed item, the content is stored
/// as that item instead of the projected field set, and reposts are not
/// followed.
pub fn map_content(
    record: &ContentRecord,
    raw: Option<&Value>,
    follow_reposts: bool,
) -> Result<MappedContent> {
    if let Some(item) = raw {
        return Ok(MappedContent {
            id: record.id,
            content: ContentBody::Raw(raw_document(record, item)?),
            author: AuthorDocument::from_author(&record.author),
            parent: None,
        });
    }
    let mut visited = HashSet::new();
    map_normalized(record, follow_reposts, 0, &mut visited)
}

fn map_normalized(
    record: &ContentRecord,
    follow_reposts: bool,
    depth: usize,
    visited: &mut HashSet<RecordId>,
) -> Result<MappedContent> {
    if depth > MAX_REPOST_DEPTH {
        return Err(StoreError::RepostChain {
            id: record.id.to_string(),
            reason: format!("deeper than {MAX_REPOST_DEPTH}"),
        });
    }
    if !visited.insert(record.id) {
        return Err(StoreError::RepostChain {
            id: record.id.to_string(),
            reason: "reposts itself".to_string(),
        });
    }

    let parent = match (&record.repost_of, follow_reposts) {
        (Some(original), true) => Some(Box::new(map_normalized(
            original,
            follow_reposts,
            depth + 1,
            visited,
        )?)),
        _ => None,
    };

    Ok(MappedContent {
        id: record.id,
        content: ContentBody::Normalized(ContentDocument::from_record(record)),
        author: AuthorDocument::from_author(&record.author),
        parent,
    })
}

fn raw_document(record: &ContentRecord, item: &Value) -> Result<Value> {
    let mut doc: Map<String, Value> = item
        .as_object()
        .cloned()
        .ok_or_else(|| StoreError::InvalidDocument(format!("{} is not an object", record.id)))?;
    doc.insert(ID_FIELD.to_string(), Value::String(record.id.to_string()));
    doc.insert(TYPE_FIELD.to_string(), Value::String(CONTENT_TYPE.to_string()));
    // Annotation results live on the record, not on the raw item.
    if record.geocode_strategy != GeocodeStrategy::NotAttempted {
        doc.insert("geocoder".to_string(), serde_json::to_value(record.geocode_strategy)?);
        doc.insert("coordinates".to_string(), serde_json::to_value(&record.coordinates)?);
    }
    Ok(Value::Object(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedbase_common::Coordinates;
    use serde_json::json;

    fn record(id: u64, author: u64) -> ContentRecord {
        serde_json::from_value(json!({
            "id": id,
            "id_str": id.to_string(),
            "created_at": "Tue Feb 17 21:03:24 +0000 2015",
            "text": format!("status {id}"),
            "user": {"id_str": author.to_string(), "screen_name": format!("user{author}")},
            "in_reply_to_status_id_str": "77",
            "retweet_count": 4
        }))
        .unwrap()
    }

    fn repost(id: u64, original: ContentRecord) -> ContentRecord {
        let mut r = record(id, 2000 + id);
        r.repost_of = Some(Box::new(original));
        r
    }

    #[test]
    fn content_holds_author_id_only() {
        let mapped = map_content(&record(10, 1001), None, true).unwrap();
        let value = mapped.content.to_value().unwrap();
        assert_eq!(value["_id"], json!("10"));
        assert_eq!(value["type"], json!(CONTENT_TYPE));
        assert_eq!(value["user_id"], json!("1001"));
        assert_eq!(value["in_reply_to_status_id"], json!("77"));
        assert_eq!(value["retweet_count"], json!(4));
        assert_eq!(value["retweeted_by_list"], json!([]));
        assert!(value.get("user").is_none());
        assert_eq!(mapped.author.doc_id, "user:1001");
        assert_eq!(mapped.author.doc_type, AUTHOR_TYPE);
    }

    #[test]
    fn coordinates_flatten_to_pair() {
        let mut r = record(10, 1001);
        r.coordinates = Some(Coordinates::point(-73.9, 40.7));
        let value = map_content(&r, None, false).unwrap().content.to_value().unwrap();
        assert_eq!(value["coordinates"], json!([-73.9, 40.7]));
    }

    #[test]
    fn follows_reposts_when_asked() {
        let r = repost(30, repost(20, record(10, 1001)));
        let followed = map_content(&r, None, true).unwrap();
        assert_eq!(followed.chain_len(), 3);
        assert_eq!(followed.parent.as_ref().unwrap().id.value(), 20);

        let unfollowed = map_content(&r, None, false).unwrap();
        assert_eq!(unfollowed.chain_len(), 1);
        let value = unfollowed.content.to_value().unwrap();
        assert_eq!(value["retweeted_status_id"], json!("20"));
    }

    #[test]
    fn rejects_self_repost() {
        let r = repost(10, record(10, 1001));
        let err = map_content(&r, None, true).unwrap_err();
        assert!(matches!(err, StoreError::RepostChain { .. }));
    }

    #[test]
    fn rejects_overlong_chain() {
        let mut r = record(1, 1001);
        for id in 2..=(MAX_REPOST_DEPTH as u64 + 2) {
            r = repost(id, r);
        }
        assert!(map_content(&r, None, true).is_err());

        let mut ok = record(1, 1001);
        for id in 2..=(MAX_REPOST_DEPTH as u64 + 1) {
            ok = repost(id, ok);
        }
        assert_eq!(
            map_content(&ok, None, true).unwrap().chain_len(),
            MAX_REPOST_DEPTH + 1
        );
    }

    #[test]
    fn raw_mode_keeps_item() {
        let item = json!({
            "id": 10,
            "id_str": "10",
            "created_at": "Tue Feb 17 21:03:24 +0000 2015",
            "text": "raw",
            "user": {"id_str": "1001", "screen_name": "someone"},
            "retweeted_status": {
                "id_str": "5",
                "created_at": "Tue Feb 17 21:03:24 +0000 2015",
                "text": "original",
                "user": {"id_str": "1002"}
            },
            "extra": {"kept": true}
        });
        let mut r: ContentRecord = serde_json::from_value(item.clone()).unwrap();
        r.geocode_strategy = GeocodeStrategy::Place;
        r.coordinates = Some(Coordinates::point(1.0, 2.0));

        let mapped = map_content(&r, Some(&item), true).unwrap();
        assert!(mapped.parent.is_none());
        assert_eq!(mapped.author.doc_id, "user:1001");

        let value = mapped.content.to_value().unwrap();
        assert_eq!(value["_id"], json!("10"));
        assert_eq!(value["type"], json!(CONTENT_TYPE));
        assert_eq!(value["extra"]["kept"], json!(true));
        assert_eq!(value["user"]["screen_name"], json!("someone"));
        assert_eq!(value["geocoder"], json!("place"));
        assert_eq!(value["coordinates"]["coordinates"], json!([1.0, 2.0]));
    }
}
