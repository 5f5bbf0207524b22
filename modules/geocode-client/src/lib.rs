pub mod error;

pub use error::{GeocodeError, Result};

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

const BASE_URL: &str = "https://maps.googleapis.com/maps/api";

/// Environment variable holding the API key.
pub const API_KEY_VAR: &str = "GOOGLE_API_KEY";

/// A place found for a free-text address.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeMatch {
    /// Canonical name of the place.
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: String,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeZoneResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    raw_offset: i64,
    #[serde(default)]
    dst_offset: i64,
}

/// Response statuses shared by both APIs.
trait ApiStatus {
    fn status(&self) -> &str;
    fn error_message(&self) -> Option<&str>;
}

impl ApiStatus for GeocodeResponse {
    fn status(&self) -> &str {
        &self.status
    }
    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

impl ApiStatus for TimeZoneResponse {
    fn status(&self) -> &str {
        &self.status
    }
    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

// --- Client ---

pub struct GoogleGeocoder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    requests: AtomicU64,
}

impl GoogleGeocoder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
            requests: AtomicU64::new(0),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_VAR)
            .map_err(|_| GeocodeError::MissingKey(format!("{API_KEY_VAR} not set")))?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Requests sent so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Look up a free-text location. `Ok(None)` when nothing matches.
    pub async fn geocode(&self, address: &str) -> Result<Option<GeocodeMatch>> {
        let url = format!("{}/geocode/json", self.base_url);
        let resp: GeocodeResponse = self.get(&url, &[("address", address.to_string())]).await?;
        if resp.status == "ZERO_RESULTS" {
            return Ok(None);
        }
        self.check(&resp)?;

        Ok(resp.results.into_iter().next().map(|r| GeocodeMatch {
            name: r.formatted_address,
            latitude: r.geometry.location.lat,
            longitude: r.geometry.location.lng,
        }))
    }

    /// Offset from UTC in seconds, daylight saving included, in effect at
    /// the point at instant `at`. `Ok(None)` when the point has no time zone
    /// (open ocean).
    pub async fn utc_offset_at(
        &self,
        latitude: f64,
        longitude: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let url = format!("{}/timezone/json", self.base_url);
        let resp: TimeZoneResponse = self
            .get(
                &url,
                &[
                    ("location", format!("{latitude},{longitude}")),
                    ("timestamp", at.timestamp().to_string()),
                ],
            )
            .await?;
        if resp.status == "ZERO_RESULTS" {
            return Ok(None);
        }
        self.check(&resp)?;
        Ok(Some(resp.raw_offset + resp.dst_offset))
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, params: &[(&str, String)]) -> Result<T> {
        let count = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(url, count, "Geocoder request");

        let resp = self
            .client
            .get(url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GeocodeError::Api {
                status: status.as_u16().to_string(),
                message: body,
            });
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    fn check(&self, resp: &impl ApiStatus) -> Result<()> {
        match resp.status() {
            "OK" => Ok(()),
            "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => Err(GeocodeError::QuotaExceeded {
                requests: self.request_count(),
            }),
            other => Err(GeocodeError::Api {
                status: other.to_string(),
                message: resp.error_message().unwrap_or_default().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_geocode_response() {
        let resp: GeocodeResponse = serde_json::from_str(
            r#"{
                "status": "OK",
                "results": [{
                    "formatted_address": "Brooklyn, NY, USA",
                    "geometry": {"location": {"lat": 40.678, "lng": -73.944}}
                }]
            }"#,
        )
        .unwrap();
        let geocoder = GoogleGeocoder::new("k");
        assert!(geocoder.check(&resp).is_ok());
        assert_eq!(resp.results[0].geometry.location.lng, -73.944);
    }

    #[test]
    fn quota_statuses_are_distinguishable() {
        let geocoder = GoogleGeocoder::new("k");
        for status in ["OVER_QUERY_LIMIT", "OVER_DAILY_LIMIT"] {
            let resp = GeocodeResponse {
                status: status.to_string(),
                error_message: None,
                results: Vec::new(),
            };
            assert!(geocoder.check(&resp).unwrap_err().is_quota_exceeded());
        }

        let denied = GeocodeResponse {
            status: "REQUEST_DENIED".to_string(),
            error_message: Some("bad key".to_string()),
            results: Vec::new(),
        };
        let err = geocoder.check(&denied).unwrap_err();
        assert!(!err.is_quota_exceeded());
        assert!(err.to_string().contains("bad key"));
    }

    #[test]
    fn timezone_offset_includes_dst() {
        let resp: TimeZoneResponse = serde_json::from_str(
            r#"{"status": "OK", "rawOffset": -18000, "dstOffset": 3600, "timeZoneId": "America/New_York"}"#,
        )
        .unwrap();
        assert_eq!(resp.raw_offset + resp.dst_offset, -14400);
    }

    #[test]
    fn base_url_is_trimmed() {
        let geocoder = GoogleGeocoder::new("k").with_base_url("http://127.0.0.1:8080/");
        assert_eq!(geocoder.base_url, "http://127.0.0.1:8080");
    }
}
