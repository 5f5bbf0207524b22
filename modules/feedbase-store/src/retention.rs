//! Bounded retention with hysteresis.
//!
//! Pruning only starts once the store holds more than twice the limit, and
//! then cuts back to exactly the limit. A store hovering near the limit is
//! never pruned on every write.

use tracing::info;

use crate::error::Result;
use crate::store::ContentStore;

/// Outcome of a retention pass that pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionReport {
    pub count_before: u64,
    pub deleted: u64,
}

/// Number of documents to delete to bring `count` back to `limit`, or
/// `None` while `count` is within twice the limit.
pub fn prune_target(count: u64, limit: u64) -> Option<u64> {
    if count > limit.saturating_mul(2) {
        Some(count - limit)
    } else {
        None
    }
}

impl ContentStore {
    /// Prune the oldest content and compact when the count exceeds twice
    /// `limit`. Returns `None` when nothing had to be done.
    pub async fn enforce_retention(&self, limit: u64) -> Result<Option<RetentionReport>> {
        let count = self.content_count().await?;
        let Some(target) = prune_target(count, limit) else {
            return Ok(None);
        };

        info!(count, limit, pruning = target, "Retention limit exceeded");
        let deleted = self.prune_oldest(target).await?;
        self.compact().await?;

        Ok(Some(RetentionReport {
            count_before: count,
            deleted,
        }))
    }
}
