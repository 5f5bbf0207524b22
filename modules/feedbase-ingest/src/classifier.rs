//! Decoding of raw feed items into a closed set of kinds.
//!
//! Each item is inspected once, here. Everything downstream works with
//! [`FeedItem`] and never looks at marker fields again.

use serde_json::Value;

use feedbase_common::ContentRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    /// A content record, with the item it was decoded from.
    Content {
        record: Box<ContentRecord>,
        raw: Value,
    },
    /// Items the server withheld; a running count since the connection opened.
    RateLimitNotice { skipped: u64 },
    Warning { message: String },
    DisconnectNotice { code: i64, detail: String },
    TerminalError { code: i64, detail: String },
    Informational { message: String },
    /// Carries the content marker but does not decode as a record.
    MalformedContent { error: String, raw: Value },
}

impl FeedItem {
    pub fn kind(&self) -> &'static str {
        match self {
            FeedItem::Content { .. } => "content",
            FeedItem::RateLimitNotice { .. } => "rate_limit",
            FeedItem::Warning { .. } => "warning",
            FeedItem::DisconnectNotice { .. } => "disconnect",
            FeedItem::TerminalError { .. } => "terminal_error",
            FeedItem::Informational { .. } => "informational",
            FeedItem::MalformedContent { .. } => "malformed_content",
        }
    }
}

/// Classify one decoded item by its marker field. Never fails: unknown
/// shapes are informational.
pub fn classify(item: Value) -> FeedItem {
    if item.get("text").is_some() || item.get("full_text").is_some() {
        return match serde_json::from_value::<ContentRecord>(item.clone()) {
            Ok(record) => FeedItem::Content {
                record: Box::new(record),
                raw: item,
            },
            Err(e) => FeedItem::MalformedContent {
                error: e.to_string(),
                raw: item,
            },
        };
    }

    if let Some(limit) = item.get("limit") {
        return FeedItem::RateLimitNotice {
            skipped: limit.get("track").and_then(Value::as_u64).unwrap_or(0),
        };
    }

    if let Some(warning) = item.get("warning") {
        let message = warning
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| warning.to_string());
        return FeedItem::Warning { message };
    }

    if let Some(disconnect) = item.get("disconnect") {
        return FeedItem::DisconnectNotice {
            code: disconnect.get("code").and_then(Value::as_i64).unwrap_or(0),
            detail: disconnect
                .get("reason")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| disconnect.to_string()),
        };
    }

    if let Some(errors) = item.get("errors") {
        let first = errors.as_array().and_then(|list| list.first()).unwrap_or(errors);
        return FeedItem::TerminalError {
            code: first.get("code").and_then(Value::as_i64).unwrap_or(0),
            detail: first
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| errors.to_string()),
        };
    }

    if let Some(message) = item.get("message") {
        return FeedItem::TerminalError {
            code: item.get("code").and_then(Value::as_i64).unwrap_or(0),
            detail: message
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| message.to_string()),
        };
    }

    FeedItem::Informational {
        message: item.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status() -> Value {
        json!({
            "id_str": "42",
            "created_at": "Tue Feb 17 21:03:24 +0000 2015",
            "text": "pizza",
            "user": {"id_str": "7", "screen_name": "someone"}
        })
    }

    #[test]
    fn content_keeps_raw_item() {
        match classify(status()) {
            FeedItem::Content { record, raw } => {
                assert_eq!(record.id.value(), 42);
                assert_eq!(raw, status());
            }
            other => panic!("expected content, got {other:?}"),
        }
    }

    #[test]
    fn undecodable_content_keeps_the_item() {
        let item = json!({"text": "no id or user"});
        match classify(item.clone()) {
            FeedItem::MalformedContent { error, raw } => {
                assert!(error.contains("id_str"), "{error}");
                assert_eq!(raw, item);
            }
            other => panic!("expected malformed content, got {other:?}"),
        }
    }

    #[test]
    fn null_favorite_count_is_content() {
        let mut item = status();
        item["favorite_count"] = json!(null);
        item["retweet_count"] = json!(null);
        assert_eq!(classify(item).kind(), "content");
    }

    #[test]
    fn signals() {
        assert_eq!(
            classify(json!({"limit": {"track": 12}})),
            FeedItem::RateLimitNotice { skipped: 12 }
        );
        assert_eq!(
            classify(json!({"warning": {"code": "FALLING_BEHIND", "message": "behind", "percent_full": 60}})),
            FeedItem::Warning {
                message: "behind".to_string()
            }
        );
        assert_eq!(
            classify(json!({"disconnect": {"code": 7, "stream_name": "x", "reason": "admin logout"}})),
            FeedItem::DisconnectNotice {
                code: 7,
                detail: "admin logout".to_string()
            }
        );
    }

    #[test]
    fn terminal_errors() {
        assert_eq!(
            classify(json!({"errors": [{"code": 88, "message": "Rate limit exceeded"}]})),
            FeedItem::TerminalError {
                code: 88,
                detail: "Rate limit exceeded".to_string()
            }
        );
        assert_eq!(
            classify(json!({"message": "Sorry, that page does not exist", "code": 34})),
            FeedItem::TerminalError {
                code: 34,
                detail: "Sorry, that page does not exist".to_string()
            }
        );
    }

    #[test]
    fn unknown_items_are_informational() {
        assert_eq!(classify(json!({"friends": [1, 2]})).kind(), "informational");
        assert_eq!(classify(json!({"delete": {"status": {"id": 1}}})).kind(), "informational");
    }
}
