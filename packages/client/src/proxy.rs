//! Proxy rotation for the geocoding service.
//!
//! A pool of candidate egress profiles, tried in order. When a request
//! through the active proxy is throttled or refused, that proxy is marked
//! failed and the next one takes over; once the pool is spent, requests
//! fall back to the direct connection (always valid). The pool lives only
//! for the process lifetime — profiles are never persisted.
//!
//! The map-feature service is never routed through the pool: Overpass
//! endpoints and typical proxy pools are incompatible, so its client
//! connects directly by construction.

use std::sync::Mutex;
use std::time::Duration;

use crate::ClientError;

/// One candidate egress route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyProfile {
    /// Proxy hostname or IP.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Whether this proxy has been marked unusable this run.
    pub failed: bool,
}

struct PoolEntry {
    profile: ProxyProfile,
    client: reqwest::Client,
}

/// Rotating pool of proxied HTTP clients.
pub struct ProxyPool {
    entries: Mutex<Vec<PoolEntry>>,
}

impl ProxyPool {
    /// Builds one HTTP client per usable profile.
    ///
    /// Profiles whose client fails to build (bad proxy URL) are dropped
    /// with a warning rather than failing the run — the direct connection
    /// remains as the fallback.
    #[must_use]
    pub fn new(profiles: Vec<ProxyProfile>, user_agent: &str, timeout: Duration) -> Self {
        let entries = profiles
            .into_iter()
            .filter_map(|profile| {
                let url = format!("http://{}:{}", profile.host, profile.port);
                match reqwest::Proxy::all(&url)
                    .and_then(|proxy| {
                        reqwest::Client::builder()
                            .user_agent(user_agent)
                            .timeout(timeout)
                            .proxy(proxy)
                            .build()
                    }) {
                    Ok(client) => Some(PoolEntry { profile, client }),
                    Err(e) => {
                        log::warn!("Skipping unusable proxy {url}: {e}");
                        None
                    }
                }
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Pool with no proxies (direct connections only).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// The first non-failed proxy, as `(index, client)`. `None` means use
    /// the direct connection.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn active(&self) -> Option<(usize, reqwest::Client)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .find(|(_, entry)| !entry.profile.failed)
            .map(|(idx, entry)| (idx, entry.client.clone()))
    }

    /// Marks the proxy at `idx` failed so rotation moves past it.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn mark_failed(&self, idx: usize) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(idx) {
            log::warn!(
                "Marking proxy {}:{} failed, rotating",
                entry.profile.host,
                entry.profile.port
            );
            entry.profile.failed = true;
        }
    }

    /// Whether an error seen through a proxy should burn that proxy.
    ///
    /// Throttling and permanent refusals are attributed to the egress
    /// route; transient network noise is not.
    #[must_use]
    pub const fn burns_proxy(error: &ClientError) -> bool {
        matches!(
            error,
            ClientError::RateLimited { .. } | ClientError::Fatal { .. }
        )
    }
}
