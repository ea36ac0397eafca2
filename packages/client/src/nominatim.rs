//! Nominatim geocoding confirmation client.
//!
//! Free-text search (candidate confirmation) and reverse lookup
//! (coordinates to display address). Nominatim's public instance has a
//! strict usage policy: **1 request per second** and an identifying
//! User-Agent, enforced here by the per-service pacer and the contact
//! string from configuration. Sustained throttling trips the cooldown
//! gate into a long pause before the service escalates to a hard ban.
//!
//! Requests may be routed through the proxy pool; a proxy that gets
//! throttled or refused is burned and the next one (or the direct
//! connection) takes over.
//!
//! See <https://nominatim.org/release-docs/develop/api/Search/>

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ClientConfig;
use crate::pacing::{BackoffPolicy, CooldownGate, Pacer, Sleeper, TokioSleeper};
use crate::proxy::ProxyPool;
use crate::retry::{self, RequestPolicy};
use crate::{ClientError, GeocodeMatch, Geocoder};

/// Maximum matches requested per search.
const SEARCH_LIMIT: u32 = 5;

/// HTTP timeout for geocoding calls.
const HTTP_TIMEOUT_S: u64 = 30;

/// Rate-limited Nominatim client with cooldown and proxy rotation.
pub struct NominatimClient {
    http: reqwest::Client,
    base_url: String,
    pacer: Pacer,
    cooldown: CooldownGate,
    backoff: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
    proxies: ProxyPool,
}

impl NominatimClient {
    /// Builds a client from resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let timeout = Duration::from_secs(HTTP_TIMEOUT_S);
        let http = reqwest::Client::builder()
            .user_agent(config.contact.clone())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.nominatim_url.trim_end_matches('/').to_string(),
            pacer: Pacer::new(config.nominatim_pacing),
            cooldown: CooldownGate::standard(),
            backoff: BackoffPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            proxies: ProxyPool::new(config.proxies.clone(), &config.contact, timeout),
        })
    }

    /// Overrides the sleeper (used by tests to avoid real delays).
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Sends one paced, retried GET, rotating past burned proxies.
    async fn request_json(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/{path}", self.base_url);
        loop {
            let route = self.proxies.active();
            let client = route
                .as_ref()
                .map_or_else(|| self.http.clone(), |(_, proxied)| proxied.clone());

            self.pacer.pace(&*self.sleeper).await;

            let policy = RequestPolicy {
                backoff: &self.backoff,
                cooldown: Some(&self.cooldown),
                sleeper: &*self.sleeper,
            };
            let result = retry::send_json(|| client.get(&url).query(params), &policy).await;

            match (result, route) {
                (Err(e), Some((idx, _))) if ProxyPool::burns_proxy(&e) => {
                    self.proxies.mark_failed(idx);
                }
                (other, _) => return other,
            }
        }
    }
}

/// Parses a Nominatim search response into matches.
///
/// Results without a usable bounding box or place rank are skipped — the
/// confirmation scoring needs both.
fn parse_matches(body: &serde_json::Value) -> Result<Vec<GeocodeMatch>, ClientError> {
    let results = body.as_array().ok_or_else(|| ClientError::Parse {
        message: "Nominatim response is not an array".to_string(),
    })?;

    let matches = results
        .iter()
        .filter_map(|result| {
            let display_name = result["display_name"].as_str()?.to_string();
            let place_rank = u32::try_from(result["place_rank"].as_u64()?).ok()?;
            let bbox = result["boundingbox"].as_array()?;
            if bbox.len() != 4 {
                return None;
            }
            let mut bounding_box = [0.0_f64; 4];
            for (slot, value) in bounding_box.iter_mut().zip(bbox) {
                *slot = value.as_str().and_then(|s| s.parse().ok())?;
            }
            Some(GeocodeMatch {
                display_name,
                place_rank,
                bounding_box,
            })
        })
        .collect();

    Ok(matches)
}

/// Parses a Nominatim reverse response. The service reports "nothing
/// there" as an `error` object rather than an empty body.
fn parse_reverse(body: &serde_json::Value) -> Option<String> {
    if body.get("error").is_some() {
        return None;
    }
    body["display_name"].as_str().map(String::from)
}

#[async_trait]
impl Geocoder for NominatimClient {
    async fn search(&self, query: &str) -> Result<Vec<GeocodeMatch>, ClientError> {
        let params = [
            ("q", query.to_string()),
            ("format", "jsonv2".to_string()),
            ("limit", SEARCH_LIMIT.to_string()),
            ("addressdetails", "0".to_string()),
        ];
        let body = self.request_json("search", &params).await?;
        parse_matches(&body)
    }

    async fn reverse(&self, lat: f64, lon: f64) -> Result<Option<String>, ClientError> {
        let params = [
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
            ("format", "jsonv2".to_string()),
        ];
        let body = self.request_json("reverse", &params).await?;
        Ok(parse_reverse(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_results() {
        let body = serde_json::json!([{
            "display_name": "12, Unter den Linden, Mitte, Berlin, 10117, Germany",
            "place_rank": 30,
            "boundingbox": ["52.5170", "52.5172", "13.3888", "13.3891"]
        }]);
        let matches = parse_matches(&body).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].place_rank, 30);
        assert!((matches[0].bounding_box[0] - 52.5170).abs() < 1e-6);
    }

    #[test]
    fn skips_results_missing_scoring_fields() {
        let body = serde_json::json!([
            {"display_name": "somewhere", "place_rank": 30},
            {"display_name": "elsewhere", "boundingbox": ["1", "2", "3", "4"]},
            {
                "display_name": "complete",
                "place_rank": 26,
                "boundingbox": ["52.1", "52.2", "13.1", "13.2"]
            }
        ]);
        let matches = parse_matches(&body).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].display_name, "complete");
    }

    #[test]
    fn empty_search_is_ok_and_empty() {
        let body = serde_json::json!([]);
        assert!(parse_matches(&body).unwrap().is_empty());
    }

    #[test]
    fn non_array_search_is_a_parse_error() {
        let body = serde_json::json!({"error": "bad request"});
        assert!(matches!(
            parse_matches(&body),
            Err(ClientError::Parse { .. })
        ));
    }

    #[test]
    fn reverse_error_object_means_no_address() {
        let body = serde_json::json!({"error": "Unable to geocode"});
        assert!(parse_reverse(&body).is_none());

        let body = serde_json::json!({"display_name": "1, Ocean Drive, Atlantis"});
        assert_eq!(
            parse_reverse(&body).as_deref(),
            Some("1, Ocean Drive, Atlantis")
        );
    }
}
