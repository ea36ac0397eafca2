//! Overpass map-feature query client.
//!
//! Issues bounding-box queries for address-bearing `OpenStreetMap`
//! elements (`addr:housenumber` nodes and ways, plus named/addressed
//! streets). Query timeout and result ceilings are mandatory request
//! parameters — the public Overpass instances kill unbounded queries.
//!
//! Always connects directly; see the crate docs for why the proxy pool is
//! reserved for the geocoding service.
//!
//! See <https://wiki.openstreetmap.org/wiki/Overpass_API>

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ClientConfig;
use crate::pacing::{BackoffPolicy, Pacer, Sleeper, TokioSleeper};
use crate::retry::{self, RequestPolicy};
use crate::{BoundingBox, ClientError, FeatureQuery, MapFeature};

/// Server-side query timeout, in seconds. Mandatory.
const QUERY_TIMEOUT_S: u32 = 25;

/// Server-side memory ceiling for a query, in bytes (512 MiB). Mandatory.
const QUERY_MAX_SIZE: u64 = 536_870_912;

/// HTTP timeout, comfortably above the server-side query timeout.
const HTTP_TIMEOUT_S: u64 = 60;

/// Rate-limited Overpass client.
pub struct OverpassClient {
    http: reqwest::Client,
    base_url: String,
    pacer: Pacer,
    backoff: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl OverpassClient {
    /// Builds a client from resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(config.contact.clone())
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_S))
            .build()?;
        Ok(Self {
            http,
            base_url: config.overpass_url.clone(),
            pacer: Pacer::new(config.overpass_pacing),
            backoff: BackoffPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Overrides the sleeper (used by tests to avoid real delays).
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

/// Renders the Overpass QL query for address-bearing elements in `bbox`.
fn build_query(bbox: &BoundingBox, limit: usize) -> String {
    let bounds = bbox.to_overpass();
    let mut query = format!("[out:json][timeout:{QUERY_TIMEOUT_S}][maxsize:{QUERY_MAX_SIZE}];\n(\n");
    for selector in [
        "node[\"addr:housenumber\"]",
        "way[\"addr:housenumber\"]",
        "node[\"addr:street\"]",
    ] {
        query.push_str(&format!("  {selector}({bounds});\n"));
    }
    query.push_str(&format!(");\nout center {limit};"));
    query
}

/// Parses an Overpass JSON response into features.
///
/// Elements without tags or without usable coordinates (nodes carry
/// `lat`/`lon`, ways a `center` object) are skipped.
fn parse_features(body: &serde_json::Value) -> Result<Vec<MapFeature>, ClientError> {
    let elements = body
        .get("elements")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| ClientError::Parse {
            message: "Overpass response has no elements array".to_string(),
        })?;

    let mut features = Vec::new();
    for element in elements {
        let Some(tags) = element.get("tags").and_then(serde_json::Value::as_object) else {
            continue;
        };
        let position = element
            .get("lat")
            .and_then(serde_json::Value::as_f64)
            .zip(element.get("lon").and_then(serde_json::Value::as_f64))
            .or_else(|| {
                let center = element.get("center")?;
                center
                    .get("lat")
                    .and_then(serde_json::Value::as_f64)
                    .zip(center.get("lon").and_then(serde_json::Value::as_f64))
            });
        let Some((lat, lon)) = position else {
            continue;
        };

        features.push(MapFeature {
            lat,
            lon,
            tags: tags
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
        });
    }

    Ok(features)
}

#[async_trait]
impl FeatureQuery for OverpassClient {
    async fn features_in(
        &self,
        bbox: &BoundingBox,
        limit: usize,
    ) -> Result<Vec<MapFeature>, ClientError> {
        let query = build_query(bbox, limit);
        self.pacer.pace(&*self.sleeper).await;

        let policy = RequestPolicy {
            backoff: &self.backoff,
            cooldown: None,
            sleeper: &*self.sleeper,
        };
        let body = retry::send_json(
            || {
                self.http
                    .post(&self.base_url)
                    .form(&[("data", query.clone())])
            },
            &policy,
        )
        .await?;

        parse_features(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_carries_mandatory_ceilings() {
        let bbox = BoundingBox {
            south: 52.4,
            west: 13.3,
            north: 52.6,
            east: 13.5,
        };
        let query = build_query(&bbox, 60);
        assert!(query.contains("[timeout:25]"));
        assert!(query.contains("[maxsize:536870912]"));
        assert!(query.contains("(52.4,13.3,52.6,13.5)"));
        assert!(query.contains("out center 60;"));
    }

    #[test]
    fn parses_node_and_way_elements() {
        let body = serde_json::json!({
            "elements": [
                {
                    "type": "node",
                    "lat": 52.5201,
                    "lon": 13.4051,
                    "tags": {"addr:housenumber": "12", "addr:street": "Unter den Linden"}
                },
                {
                    "type": "way",
                    "center": {"lat": 52.5105, "lon": 13.3889},
                    "tags": {"addr:housenumber": "77", "addr:street": "Leipziger Straße"}
                }
            ]
        });
        let features = parse_features(&body).unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(
            features[0].tags.get("addr:street").map(String::as_str),
            Some("Unter den Linden")
        );
        assert!((features[1].lat - 52.5105).abs() < 1e-6);
    }

    #[test]
    fn skips_untagged_and_unpositioned_elements() {
        let body = serde_json::json!({
            "elements": [
                {"type": "node", "lat": 1.0, "lon": 2.0},
                {"type": "way", "tags": {"addr:street": "Nowhere Lane"}},
                {"type": "node", "lat": 3.0, "lon": 4.0, "tags": {"addr:street": "Somewhere Row"}}
            ]
        });
        let features = parse_features(&body).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(
            features[0].tags.get("addr:street").map(String::as_str),
            Some("Somewhere Row")
        );
    }

    #[test]
    fn missing_elements_is_a_parse_error() {
        let body = serde_json::json!({"remark": "runtime error"});
        assert!(matches!(
            parse_features(&body),
            Err(ClientError::Parse { .. })
        ));
    }
}
