//! Cursoring for paged endpoints.
//!
//! Pages are walked newest to oldest: each request passes `max_id` one below
//! the smallest id already seen.

use serde_json::Value;

/// Request parameter carrying the cursor.
pub const MAX_ID_PARAM: &str = "max_id";

/// Items of a page body. Timelines answer with an array, search with
/// `{"statuses": [...]}`; anything else (an error object) is passed through
/// as a single item.
pub fn page_items(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("statuses") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                obj.insert("statuses".to_string(), other);
                vec![Value::Object(obj)]
            }
            None => vec![Value::Object(obj)],
        },
        other => vec![other],
    }
}

/// Cursor for the page after `items`, or `None` when no item carries an id.
pub fn next_max_id(items: &[Value]) -> Option<u64> {
    items
        .iter()
        .filter_map(item_id)
        .min()
        .and_then(|min| min.checked_sub(1))
}

fn item_id(item: &Value) -> Option<u64> {
    if let Some(id) = item.get("id_str").and_then(Value::as_str) {
        return id.parse().ok();
    }
    item.get("id").and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_search_results() {
        let items = page_items(json!({"statuses": [{"id": 1}], "search_metadata": {}}));
        assert_eq!(items, vec![json!({"id": 1})]);
        assert_eq!(page_items(json!([{"id": 2}])).len(), 1);
    }

    #[test]
    fn passes_errors_through() {
        let body = json!({"errors": [{"code": 88, "message": "Rate limit exceeded"}]});
        assert_eq!(page_items(body.clone()), vec![body]);
    }

    #[test]
    fn cursor_is_below_smallest_id() {
        let items = vec![
            json!({"id_str": "567890123456789012"}),
            json!({"id": 1000}),
            json!({"id_str": "99999"}),
        ];
        assert_eq!(next_max_id(&items), Some(999));
        assert_eq!(next_max_id(&[json!({"limit": {}})]), None);
        assert_eq!(next_max_id(&[json!({"id": 0})]), None);
    }
}
