#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Rate-limited HTTP clients for the two external map-data services.
//!
//! Two wire services back the harvest pipeline:
//!
//! 1. **Overpass** ([`overpass`]) — bounding-box + tag-predicate queries
//!    against `OpenStreetMap` data. Tolerant of moderate request rates but
//!    still paced politely. Always contacted directly (never through a
//!    proxy — most proxy pools and the Overpass endpoints don't mix).
//! 2. **Nominatim** ([`nominatim`]) — free-text geocoding confirmation and
//!    reverse lookup. Strict usage policy: identified client, ~1 request
//!    per second, hard throttling on violations.
//!
//! Both clients own their pacing state ([`pacing::Pacer`]), retry with
//! exponential backoff ([`pacing::BackoffPolicy`]), and classify failures
//! into [`ClientError`] so callers can tell a retryable hiccup from a
//! permanent refusal. The Nominatim client additionally carries a
//! rate-limit circuit breaker ([`pacing::CooldownGate`]) and optional
//! proxy rotation ([`proxy::ProxyPool`]).

pub mod config;
pub mod nominatim;
pub mod overpass;
pub mod pacing;
pub mod proxy;
pub mod retry;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from external service calls, classified by retry semantics.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP transport failed and retries were exhausted (or the failure
    /// was not retryable).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be parsed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// The service throttled us for the entire retry budget.
    #[error("Rate limited after {attempts} attempts")]
    RateLimited {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// Transient failure (timeout, 5xx) that outlived the retry budget.
    #[error("Transient failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// Permanent failure — malformed request or a refusal that retrying
    /// cannot fix (4xx other than throttling).
    #[error("Permanent failure: {message}")]
    Fatal {
        /// Description of the failure.
        message: String,
    },
}

impl ClientError {
    /// Whether the caller may reasonably retry the same logical operation
    /// later (as opposed to never, for [`ClientError::Fatal`]).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal { .. })
    }
}

/// A geographic bounding box in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Minimum latitude.
    pub south: f64,
    /// Minimum longitude.
    pub west: f64,
    /// Maximum latitude.
    pub north: f64,
    /// Maximum longitude.
    pub east: f64,
}

/// Approximate meters per degree of latitude (WGS84).
const METERS_PER_DEGREE: f64 = 111_320.0;

impl BoundingBox {
    /// Builds a box of `radius_km` half-width centered on a point.
    ///
    /// Longitude extent is widened by the latitude cosine so the box stays
    /// roughly square on the ground away from the equator.
    #[must_use]
    pub fn around(lat: f64, lon: f64, radius_km: f64) -> Self {
        let dlat = radius_km * 1000.0 / METERS_PER_DEGREE;
        let dlon = dlat / lat.to_radians().cos().max(0.01);
        Self {
            south: lat - dlat,
            west: lon - dlon,
            north: lat + dlat,
            east: lon + dlon,
        }
    }

    /// Renders the box in Overpass `(south,west,north,east)` order.
    #[must_use]
    pub fn to_overpass(&self) -> String {
        format!("{},{},{},{}", self.south, self.west, self.north, self.east)
    }
}

/// One geo-tagged feature returned by the map-feature service.
#[derive(Debug, Clone, PartialEq)]
pub struct MapFeature {
    /// Latitude (node position or way center).
    pub lat: f64,
    /// Longitude (node position or way center).
    pub lon: f64,
    /// Raw key/value tags (`addr:housenumber`, `addr:street`, `name`, ...).
    pub tags: BTreeMap<String, String>,
}

/// One match returned by the geocoding confirmation service.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeMatch {
    /// Canonical display string of the matched place.
    pub display_name: String,
    /// Specificity rank — higher means more specific (30 = building level
    /// on Nominatim's scale).
    pub place_rank: u32,
    /// Bounding box as `[south, north, west, east]` degrees, Nominatim
    /// order.
    pub bounding_box: [f64; 4],
}

impl GeocodeMatch {
    /// Approximate area of the bounding box in square meters.
    ///
    /// Used as an inverse proxy for match precision: a building-level
    /// match has a tiny box, a city-level match an enormous one.
    #[must_use]
    pub fn area_m2(&self) -> f64 {
        let [south, north, west, east] = self.bounding_box;
        let height = (north - south).abs() * METERS_PER_DEGREE;
        let mid_lat = f64::midpoint(south, north);
        let width = (east - west).abs() * METERS_PER_DEGREE * mid_lat.to_radians().cos().abs();
        height * width
    }
}

/// Map-feature query service (Overpass or a test double).
#[async_trait]
pub trait FeatureQuery: Send + Sync {
    /// Returns up to `limit` geo-tagged features inside `bbox`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the query fails after retries.
    async fn features_in(
        &self,
        bbox: &BoundingBox,
        limit: usize,
    ) -> Result<Vec<MapFeature>, ClientError>;
}

/// Geocoding confirmation service (Nominatim or a test double).
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Free-text search returning zero or more candidate matches.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the request fails after retries.
    async fn search(&self, query: &str) -> Result<Vec<GeocodeMatch>, ClientError>;

    /// Reverse lookup: coordinates to a display address, if the service
    /// knows one.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the request fails after retries.
    async fn reverse(&self, lat: f64, lon: f64) -> Result<Option<String>, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_around_is_centered() {
        let bbox = BoundingBox::around(52.52, 13.405, 10.0);
        assert!(bbox.south < 52.52 && 52.52 < bbox.north);
        assert!(bbox.west < 13.405 && 13.405 < bbox.east);
        // ~10km of latitude is ~0.09 degrees.
        assert!((bbox.north - bbox.south - 0.18).abs() < 0.01);
    }

    #[test]
    fn bbox_overpass_order_is_south_west_north_east() {
        let bbox = BoundingBox {
            south: 1.0,
            west: 2.0,
            north: 3.0,
            east: 4.0,
        };
        assert_eq!(bbox.to_overpass(), "1,2,3,4");
    }

    #[test]
    fn match_area_scales_with_box_size() {
        let small = GeocodeMatch {
            display_name: String::new(),
            place_rank: 30,
            bounding_box: [52.520_00, 52.520_09, 13.405_00, 13.405_15],
        };
        let large = GeocodeMatch {
            display_name: String::new(),
            place_rank: 16,
            bounding_box: [52.3, 52.7, 13.1, 13.8],
        };
        assert!(small.area_m2() < 1_000.0);
        assert!(large.area_m2() > 1_000_000.0);
        assert!(small.area_m2() > 0.0);
    }

    #[test]
    fn fatal_is_not_retryable() {
        assert!(!ClientError::Fatal {
            message: "HTTP 400".to_string()
        }
        .is_retryable());
        assert!(ClientError::RateLimited { attempts: 3 }.is_retryable());
        assert!(ClientError::Transient {
            message: "timeout".to_string()
        }
        .is_retryable());
    }
}
