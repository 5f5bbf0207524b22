//! Best-effort location for content records.
//!
//! Strategies are tried in order: explicit coordinates, the midpoint of the
//! place's bounding box, then a lookup of the author's free-text location
//! that is accepted only when the time zone at the result agrees with the
//! author's stated UTC offset.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use feedbase_common::{ContentRecord, Coordinates, GeocodeStrategy};
use geocode_client::{GeocodeError, GeocodeMatch, GoogleGeocoder};

/// Largest accepted gap between the author's offset and the offset at the
/// looked-up point.
pub const OFFSET_TOLERANCE_SECS: i64 = 3600;

/// Lookups stay off this long after the quota runs out.
pub fn quota_cooldown() -> Duration {
    Duration::hours(24)
}

// ---------------------------------------------------------------------------
// Geocoder: lookup collaborator
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve free text to a place. `Ok(None)` when nothing matches.
    async fn reverse_geocode(&self, text: &str) -> Result<Option<GeocodeMatch>, GeocodeError>;

    /// UTC offset in seconds at a point at instant `at`.
    async fn utc_offset_at(
        &self,
        latitude: f64,
        longitude: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>, GeocodeError>;
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn reverse_geocode(&self, text: &str) -> Result<Option<GeocodeMatch>, GeocodeError> {
        self.geocode(text).await
    }

    async fn utc_offset_at(
        &self,
        latitude: f64,
        longitude: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>, GeocodeError> {
        GoogleGeocoder::utc_offset_at(self, latitude, longitude, at).await
    }
}

// ---------------------------------------------------------------------------
// QuotaGuard: shared quota state and counters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeocodeStats {
    pub coordinates: u64,
    pub places: u64,
    pub lookups: u64,
    pub matches: u64,
    pub rejected: u64,
    pub no_result: u64,
    pub failures: u64,
    pub quota_skips: u64,
}

#[derive(Debug, Default)]
struct QuotaState {
    exceeded_at: Option<DateTime<Utc>>,
    stats: GeocodeStats,
}

/// Quota-exceeded flag with the time it was raised. Shared by every
/// annotator in the process.
#[derive(Debug, Default)]
pub struct QuotaGuard {
    state: Mutex<QuotaState>,
}

impl QuotaGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_exceeded(&self, at: DateTime<Utc>) {
        self.with_state(|s| s.exceeded_at = Some(at));
    }

    /// Whether lookups are suspended at `now`. Clears the flag once the
    /// cooldown has passed.
    pub fn is_exceeded(&self, now: DateTime<Utc>) -> bool {
        self.with_state(|s| {
            let Some(at) = s.exceeded_at else {
                return false;
            };
            if now - at >= quota_cooldown() {
                s.exceeded_at = None;
                return false;
            }
            true
        })
    }

    pub fn exceeded_at(&self) -> Option<DateTime<Utc>> {
        self.with_state(|s| s.exceeded_at)
    }

    pub fn stats(&self) -> GeocodeStats {
        self.with_state(|s| s.stats)
    }

    fn record(&self, update: impl FnOnce(&mut GeocodeStats)) {
        self.with_state(|s| update(&mut s.stats));
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut QuotaState) -> T) -> T {
        // A panic while holding the lock leaves plain counters behind.
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Log a one-line summary of geocoder activity.
    pub fn log_stats(&self) {
        let s = self.stats();
        info!(
            coordinates = s.coordinates,
            places = s.places,
            lookups = s.lookups,
            matches = s.matches,
            rejected = s.rejected,
            no_result = s.no_result,
            failures = s.failures,
            quota_skips = s.quota_skips,
            quota_exceeded_at = ?self.exceeded_at(),
            "geocoder_stats"
        );
    }
}

// ---------------------------------------------------------------------------
// Annotator
// ---------------------------------------------------------------------------

pub struct Annotator {
    geocoder: Arc<dyn Geocoder>,
    quota: Arc<QuotaGuard>,
}

impl Annotator {
    pub fn new(geocoder: Arc<dyn Geocoder>, quota: Arc<QuotaGuard>) -> Self {
        Self { geocoder, quota }
    }

    pub fn quota(&self) -> &Arc<QuotaGuard> {
        &self.quota
    }

    pub async fn annotate(&self, record: &mut ContentRecord) -> GeocodeStrategy {
        self.annotate_at(record, Utc::now()).await
    }

    /// Set the record's strategy (and coordinates when one was inferred) as
    /// of `now`. Records already annotated are left alone.
    pub async fn annotate_at(&self, record: &mut ContentRecord, now: DateTime<Utc>) -> GeocodeStrategy {
        if record.geocode_strategy != GeocodeStrategy::NotAttempted {
            return record.geocode_strategy;
        }
        let strategy = self.decide(record, now).await;
        record.geocode_strategy = strategy;
        debug!(id = %record.id, %strategy, "Geocoded");
        strategy
    }

    async fn decide(&self, record: &mut ContentRecord, now: DateTime<Utc>) -> GeocodeStrategy {
        if record.coordinates.is_some() {
            self.quota.record(|s| s.coordinates += 1);
            return GeocodeStrategy::Coordinates;
        }

        let midpoint = record
            .place
            .as_ref()
            .and_then(|p| p.bounding_box.as_ref())
            .and_then(|b| b.midpoint());
        if let Some(point) = midpoint {
            record.coordinates = Some(point);
            self.quota.record(|s| s.places += 1);
            return GeocodeStrategy::Place;
        }

        let (Some(location), Some(utc_offset)) = (
            record.author.location_text().map(String::from),
            record.author.utc_offset_seconds,
        ) else {
            return GeocodeStrategy::None;
        };

        if self.quota.is_exceeded(now) {
            self.quota.record(|s| s.quota_skips += 1);
            return GeocodeStrategy::None;
        }

        match self.lookup(&location, utc_offset, now).await {
            Ok(Some(found)) => {
                record.coordinates = Some(Coordinates::point(found.longitude, found.latitude));
                record.author.location = Some(found.name);
                GeocodeStrategy::ReverseGeocoded
            }
            Ok(None) => GeocodeStrategy::None,
            Err(GeocodeError::QuotaExceeded { requests }) => {
                self.quota.mark_exceeded(now);
                self.quota.record(|s| s.failures += 1);
                warn!(requests, "Geocoder quota exceeded, lookups suspended");
                GeocodeStrategy::None
            }
            Err(e) => {
                self.quota.record(|s| s.failures += 1);
                warn!(error = %e, location = %location, "Geocoder lookup failed");
                GeocodeStrategy::None
            }
        }
    }

    /// Look up `location` and check it against `utc_offset`.
    async fn lookup(
        &self,
        location: &str,
        utc_offset: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<GeocodeMatch>, GeocodeError> {
        self.quota.record(|s| s.lookups += 1);

        let Some(found) = self.geocoder.reverse_geocode(location).await? else {
            self.quota.record(|s| s.no_result += 1);
            return Ok(None);
        };
        let Some(offset) = self
            .geocoder
            .utc_offset_at(found.latitude, found.longitude, now)
            .await?
        else {
            self.quota.record(|s| s.rejected += 1);
            return Ok(None);
        };

        if (offset - utc_offset).abs() <= OFFSET_TOLERANCE_SECS {
            self.quota.record(|s| s.matches += 1);
            Ok(Some(found))
        } else {
            self.quota.record(|s| s.rejected += 1);
            debug!(location, offset, utc_offset, "Time zone disagrees with author offset");
            Ok(None)
        }
    }
}
