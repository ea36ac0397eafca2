//! Environment-driven client configuration.
//!
//! Service endpoints, pacing intervals, the client identification string,
//! and the optional proxy pool are all read once at startup from the
//! environment. Only `ADDRESS_HARVEST_CONTACT` has no default — the
//! geocoding service's usage policy requires an identified client, so an
//! anonymous run is refused up front rather than mid-harvest.

use std::time::Duration;

use thiserror::Error;

use crate::proxy::ProxyProfile;

/// Default Overpass interpreter endpoint.
pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

/// Default Nominatim endpoint.
pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

/// Default minimum interval between Overpass calls.
pub const DEFAULT_OVERPASS_PACING_MS: u64 = 1000;

/// Default minimum interval between Nominatim calls (the public instance
/// allows at most one request per second; a small margin is kept).
pub const DEFAULT_NOMINATIM_PACING_MS: u64 = 1100;

/// Configuration errors found at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The mandatory client identification string is missing.
    #[error(
        "ADDRESS_HARVEST_CONTACT is not set — the geocoding service \
         requires an identified client (e.g., an email address)"
    )]
    MissingContact,

    /// A numeric environment value could not be parsed.
    #[error("{var} is not a valid integer: {value}")]
    InvalidNumber {
        /// Offending variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },

    /// A proxy pool entry is not `host:port`.
    #[error("PROXY_POOL entry is not host:port: {entry}")]
    InvalidProxy {
        /// Offending entry.
        entry: String,
    },
}

/// Resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Overpass interpreter URL.
    pub overpass_url: String,
    /// Nominatim base URL.
    pub nominatim_url: String,
    /// Client identification sent as the User-Agent.
    pub contact: String,
    /// Minimum interval between Overpass calls.
    pub overpass_pacing: Duration,
    /// Minimum interval between Nominatim calls.
    pub nominatim_pacing: Duration,
    /// Egress profiles for the geocoding service. Empty = direct only.
    pub proxies: Vec<ProxyProfile>,
}

impl ClientConfig {
    /// Reads configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the contact string is absent or a value
    /// fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let contact =
            std::env::var("ADDRESS_HARVEST_CONTACT").map_err(|_| ConfigError::MissingContact)?;
        if contact.trim().is_empty() {
            return Err(ConfigError::MissingContact);
        }

        Ok(Self {
            overpass_url: std::env::var("OVERPASS_URL")
                .unwrap_or_else(|_| DEFAULT_OVERPASS_URL.to_string()),
            nominatim_url: std::env::var("NOMINATIM_URL")
                .unwrap_or_else(|_| DEFAULT_NOMINATIM_URL.to_string()),
            contact,
            overpass_pacing: pacing_from("OVERPASS_PACING_MS", DEFAULT_OVERPASS_PACING_MS)?,
            nominatim_pacing: pacing_from("NOMINATIM_PACING_MS", DEFAULT_NOMINATIM_PACING_MS)?,
            proxies: parse_proxy_list(std::env::var("PROXY_POOL").ok().as_deref())?,
        })
    }
}

/// Reads a millisecond pacing value with a default.
fn pacing_from(var: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        Err(_) => Ok(Duration::from_millis(default_ms)),
    }
}

/// Parses a comma-separated `host:port` proxy list. `None` or an empty
/// string disables the pool.
fn parse_proxy_list(raw: Option<&str>) -> Result<Vec<ProxyProfile>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (host, port) = entry.rsplit_once(':').ok_or_else(|| ConfigError::InvalidProxy {
                entry: entry.to_string(),
            })?;
            let port: u16 = port.parse().map_err(|_| ConfigError::InvalidProxy {
                entry: entry.to_string(),
            })?;
            if host.is_empty() {
                return Err(ConfigError::InvalidProxy {
                    entry: entry.to_string(),
                });
            }
            Ok(ProxyProfile {
                host: host.to_string(),
                port,
                failed: false,
            })
        })
        .collect()
}
