//! Sort keys for the document store's ordered views.
//!
//! Record ids are 64-bit integers carried as decimal strings, and the store
//! orders view keys as strings. "7" sorts after "12345678901234567" unless
//! both are padded to the same width, so every id that takes part in an
//! ordered key goes through [`zero_pad`] first.

use chrono::{DateTime, Utc};

/// Width of a padded id. `i64::MAX` has 19 digits.
pub const KEY_WIDTH: usize = 19;

/// Largest id that still fits in [`KEY_WIDTH`] digits.
pub const MAX_RECORD_ID: u64 = 9_999_999_999_999_999_999;

/// Width of the millisecond timestamp prefix of a chronological key.
const MILLIS_WIDTH: usize = 13;

/// Zero-pad an id to [`KEY_WIDTH`] digits.
pub fn zero_pad(id: u64) -> String {
    format!("{:0width$}", id, width = KEY_WIDTH)
}

/// Chronological key: creation time in epoch milliseconds, then the padded id.
/// Equal timestamps fall back to id order.
pub fn chronological_key(created_at: DateTime<Utc>, id: u64) -> String {
    let millis = created_at.timestamp_millis().max(0);
    format!(
        "{:0width$}-{}",
        millis,
        zero_pad(id),
        width = MILLIS_WIDTH
    )
}
