use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CommonError;
use crate::keys::{chronological_key, zero_pad, MAX_RECORD_ID};

/// Wire format of `created_at`, e.g. `Wed Aug 27 13:08:45 +0000 2008`.
pub const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

// --- Ids ---

/// 64-bit record id. Carried as a decimal string on the wire and in documents
/// so consumers with 53-bit numbers never lose precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(id: u64) -> crate::Result<Self> {
        if id > MAX_RECORD_ID {
            return Err(CommonError::InvalidId(id.to_string()));
        }
        Ok(Self(id))
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Fixed-width form used in ordered view keys.
    pub fn padded(self) -> String {
        zero_pad(self.0)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = CommonError;

    fn from_str(s: &str) -> crate::Result<Self> {
        let id = s
            .trim()
            .parse::<u64>()
            .map_err(|_| CommonError::InvalidId(s.to_string()))?;
        Self::new(id)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Repr::Number(n) => RecordId::new(n).map_err(serde::de::Error::custom),
        }
    }
}

/// Field deserializer treating an explicit `null` like a missing key. The feed
/// sends `null` for several counters and flags it otherwise omits.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// --- Geo Types ---

/// GeoJSON point, `coordinates` ordered `[longitude, latitude]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(rename = "type", default = "point_kind")]
    pub kind: String,
    pub coordinates: [f64; 2],
}

fn point_kind() -> String {
    "Point".to_string()
}

impl Coordinates {
    pub fn point(longitude: f64, latitude: f64) -> Self {
        Self {
            kind: point_kind(),
            coordinates: [longitude, latitude],
        }
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }
}

/// Polygon enclosing a place. The feed sends a single ring of four corners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl BoundingBox {
    /// Midpoint of the first and third corners of the outer ring, which are
    /// opposite corners of the box.
    pub fn midpoint(&self) -> Option<Coordinates> {
        let ring = self.coordinates.first()?;
        let a = ring.first()?;
        let b = ring.get(2)?;
        Some(Coordinates::point((a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub place_type: Option<String>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

/// Which strategy located a content record. Stored as the `geocoder` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeocodeStrategy {
    Coordinates,
    Place,
    ReverseGeocoded,
    None,
    #[default]
    NotAttempted,
}

impl std::fmt::Display for GeocodeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeocodeStrategy::Coordinates => write!(f, "coordinates"),
            GeocodeStrategy::Place => write!(f, "place"),
            GeocodeStrategy::ReverseGeocoded => write!(f, "reverse-geocoded"),
            GeocodeStrategy::None => write!(f, "none"),
            GeocodeStrategy::NotAttempted => write!(f, "not-attempted"),
        }
    }
}

// --- Content ---

/// Repost and favorite counters as reported by the feed at capture time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default, deserialize_with = "null_as_default")]
    pub retweet_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub favorite_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyContext {
    #[serde(rename = "in_reply_to_status_id_str", default)]
    pub status_id: Option<RecordId>,
    #[serde(rename = "in_reply_to_user_id_str", default)]
    pub user_id: Option<RecordId>,
    #[serde(rename = "in_reply_to_screen_name", default)]
    pub screen_name: Option<String>,
}

impl ReplyContext {
    pub fn is_reply(&self) -> bool {
        self.status_id.is_some()
    }
}

/// One unit of feed content, decoded from the feed's wire shape.
///
/// The embedded author and reposted original are kept as decoded; the
/// document mapper splits them into separate documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    #[serde(rename = "id_str")]
    pub id: RecordId,
    pub created_at: String,
    #[serde(alias = "full_text")]
    pub text: String,
    #[serde(rename = "lang", default)]
    pub language: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub place: Option<Place>,
    #[serde(rename = "user")]
    pub author: Author,
    #[serde(rename = "retweeted_status", default)]
    pub repost_of: Option<Box<ContentRecord>>,
    #[serde(default)]
    pub entities: Option<serde_json::Value>,
    #[serde(flatten)]
    pub metrics: Metrics,
    #[serde(rename = "source", default)]
    pub source_client: Option<String>,
    #[serde(flatten)]
    pub reply_context: ReplyContext,
    #[serde(default, deserialize_with = "null_as_default")]
    pub truncated: bool,
    #[serde(rename = "geocoder", default, deserialize_with = "null_as_default")]
    pub geocode_strategy: GeocodeStrategy,
}

impl ContentRecord {
    pub fn is_repost(&self) -> bool {
        self.repost_of.is_some()
    }

    pub fn created_at_utc(&self) -> crate::Result<DateTime<Utc>> {
        parse_created_at(&self.created_at)
    }

    /// Key for the chronological view: creation time, then padded id.
    pub fn chronological_key(&self) -> crate::Result<String> {
        Ok(chronological_key(self.created_at_utc()?, self.id.value()))
    }
}

/// Parse a feed timestamp into UTC.
pub fn parse_created_at(raw: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_str(raw, CREATED_AT_FORMAT)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CommonError::InvalidTimestamp(format!("{raw}: {e}")))
}

// --- Authors ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    #[serde(rename = "id_str")]
    pub id: RecordId,
    #[serde(rename = "screen_name", default, deserialize_with = "null_as_default")]
    pub handle: String,
    #[serde(rename = "name", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "followers_count", default, deserialize_with = "null_as_default")]
    pub follower_count: u64,
    #[serde(rename = "friends_count", default, deserialize_with = "null_as_default")]
    pub friend_count: u64,
    #[serde(rename = "favourites_count", default, deserialize_with = "null_as_default")]
    pub favorite_count: u64,
    #[serde(rename = "statuses_count", default, deserialize_with = "null_as_default")]
    pub status_count: u64,
    #[serde(rename = "lang", default)]
    pub language: Option<String>,
    #[serde(rename = "utc_offset", default)]
    pub utc_offset_seconds: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub verified: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub geo_enabled: bool,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub entities: Option<serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Author {
    /// Free-text location, if non-blank.
    pub fn location_text(&self) -> Option<&str> {
        self.location
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status_json() -> serde_json::Value {
        json!({
            "id": 567890123456789012u64,
            "id_str": "567890123456789012",
            "created_at": "Tue Feb 17 21:03:24 +0000 2015",
            "text": "hello pizza",
            "lang": "en",
            "coordinates": null,
            "place": null,
            "user": {
                "id": 42,
                "id_str": "42",
                "screen_name": "geduldig",
                "name": "Jonas",
                "location": "  ",
                "utc_offset": -18000,
                "followers_count": 10
            },
            "entities": {"hashtags": []},
            "retweet_count": 3,
            "favorite_count": 1,
            "source": "web",
            "in_reply_to_status_id_str": "1234",
            "in_reply_to_user_id_str": null,
            "in_reply_to_screen_name": "someone",
            "truncated": false
        })
    }

    #[test]
    fn decodes_wire_status() {
        let record: ContentRecord = serde_json::from_value(status_json()).unwrap();
        assert_eq!(record.id.value(), 567_890_123_456_789_012);
        assert_eq!(record.author.id.to_string(), "42");
        assert_eq!(record.author.utc_offset_seconds, Some(-18000));
        assert_eq!(record.metrics.retweet_count, 3);
        assert_eq!(record.reply_context.status_id.map(|id| id.value()), Some(1234));
        assert_eq!(record.reply_context.user_id, None);
        assert_eq!(record.geocode_strategy, GeocodeStrategy::NotAttempted);
        assert!(!record.is_repost());
    }

    #[test]
    fn null_counters_and_flags_decode_as_defaults() {
        let mut item = status_json();
        item["favorite_count"] = json!(null);
        item["retweet_count"] = json!(null);
        item["truncated"] = json!(null);
        item["user"]["followers_count"] = json!(null);
        item["user"]["verified"] = json!(null);

        let record: ContentRecord = serde_json::from_value(item).unwrap();
        assert_eq!(record.metrics, Metrics::default());
        assert!(!record.truncated);
        assert_eq!(record.author.follower_count, 0);
        assert!(!record.author.verified);
    }

    #[test]
    fn blank_location_is_absent() {
        let record: ContentRecord = serde_json::from_value(status_json()).unwrap();
        assert_eq!(record.author.location_text(), None);
    }

    #[test]
    fn parses_created_at() {
        let record: ContentRecord = serde_json::from_value(status_json()).unwrap();
        let at = record.created_at_utc().unwrap();
        assert_eq!(at.timestamp(), 1_424_207_004);
        assert_eq!(
            record.chronological_key().unwrap(),
            "1424207004000-0567890123456789012"
        );
    }

    #[test]
    fn record_id_accepts_numbers_and_strings() {
        let a: RecordId = serde_json::from_value(json!("17")).unwrap();
        let b: RecordId = serde_json::from_value(json!(17)).unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_value(a).unwrap(), json!("17"));
        assert!(serde_json::from_value::<RecordId>(json!("not-a-number")).is_err());
        assert!(RecordId::new(u64::MAX).is_err());
    }

    #[test]
    fn bounding_box_midpoint_uses_opposite_corners() {
        let bbox = BoundingBox {
            kind: Some("Polygon".into()),
            coordinates: vec![vec![[-10.0, -10.0], [-10.0, 10.0], [10.0, 10.0], [10.0, -10.0]]],
        };
        assert_eq!(bbox.midpoint(), Some(Coordinates::point(0.0, 0.0)));
    }

    #[test]
    fn geocode_strategy_wire_names() {
        assert_eq!(
            serde_json::to_value(GeocodeStrategy::ReverseGeocoded).unwrap(),
            json!("reverse-geocoded")
        );
        assert_eq!(GeocodeStrategy::NotAttempted.to_string(), "not-attempted");
    }
}
