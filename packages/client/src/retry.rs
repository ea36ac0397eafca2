//! HTTP send helper with retry, backoff, and failure classification.
//!
//! Both wire clients send through [`send_json`] instead of calling
//! `reqwest::RequestBuilder::send()` directly, so every request gets the
//! same treatment: exponential backoff on transient failures, throttling
//! accounting through the optional [`CooldownGate`], and classification
//! of terminal failures into [`ClientError`] variants the pipeline can
//! act on.
//!
//! Status handling:
//!
//! - **429 / 403** — throttling. Counted against the cooldown gate (a
//!   tripped gate inserts one long pause), retried while attempts remain,
//!   then surfaced as [`ClientError::RateLimited`].
//! - **5xx** — server trouble; retried, then [`ClientError::Transient`].
//! - **other 4xx** — permanent; surfaced immediately as
//!   [`ClientError::Fatal`] with no retry.
//! - **connection errors / timeouts** — retried, then the underlying
//!   [`ClientError::Http`].
//! - **unparsable body** — re-fetched while attempts remain, then
//!   [`ClientError::Parse`].

use crate::pacing::{BackoffPolicy, CooldownGate, Sleeper};
use crate::ClientError;

/// Maximum length of the response-body preview included in warn logs.
const BODY_PREVIEW_LEN: usize = 300;

/// Retry/backoff context shared by one logical request.
pub struct RequestPolicy<'a> {
    /// Backoff schedule for retries.
    pub backoff: &'a BackoffPolicy,
    /// Throttling circuit breaker, if this service has one.
    pub cooldown: Option<&'a CooldownGate>,
    /// Waiting mechanism (real or recording).
    pub sleeper: &'a dyn Sleeper,
}

/// Sends an HTTP request and parses the response body as JSON.
///
/// The `build_request` closure is invoked on every attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (builders are consumed by `.send()`),
/// so any request shape — GET with query params, POST with a form body —
/// can be retried.
///
/// # Errors
///
/// Returns a classified [`ClientError`] once the retry budget is spent or
/// a permanent failure is seen.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(
    build_request: F,
    policy: &RequestPolicy<'_>,
) -> Result<serde_json::Value, ClientError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let max_attempts = policy.backoff.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = policy.backoff.delay_for(attempt - 1);
            log::warn!("  retry {}/{} in {delay:?}...", attempt - 1, max_attempts - 1);
            policy.sleeper.sleep(delay).await;
        }

        let response = match build_request().send().await {
            Ok(response) => response,
            Err(e) => {
                if is_transient(&e) && attempt < max_attempts {
                    log::warn!("  transient error: {e}");
                    continue;
                }
                return Err(ClientError::Http(e));
            }
        };

        let status = response.status();

        if is_throttled(status) {
            if let Some(gate) = policy.cooldown
                && let Some(pause) = gate.note_rate_limited()
            {
                log::warn!("  throttling streak — cooling down for {pause:?}");
                policy.sleeper.sleep(pause).await;
            }
            if attempt < max_attempts {
                log::warn!("  HTTP {status} (rate limited)");
                continue;
            }
            return Err(ClientError::RateLimited {
                attempts: max_attempts,
            });
        }

        if status.is_server_error() {
            if attempt < max_attempts {
                log::warn!("  HTTP {status} (server error)");
                continue;
            }
            return Err(ClientError::Transient {
                message: format!("HTTP {status} after {max_attempts} attempts"),
            });
        }

        if status.is_client_error() {
            return Err(ClientError::Fatal {
                message: format!("HTTP {status}"),
            });
        }

        let url = response.url().to_string();
        match response.text().await {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(value) => {
                    if let Some(gate) = policy.cooldown {
                        gate.note_success();
                    }
                    return Ok(value);
                }
                Err(json_err) => {
                    let preview = if text.len() > BODY_PREVIEW_LEN {
                        format!("{}...", &text[..BODY_PREVIEW_LEN])
                    } else {
                        text.clone()
                    };
                    if attempt < max_attempts {
                        log::warn!(
                            "  JSON parse failed, re-fetching...\n  url: {url}\n  \
                             error: {json_err}\n  body preview: {preview}"
                        );
                        continue;
                    }
                    return Err(ClientError::Parse {
                        message: format!("JSON parse failed: {json_err}"),
                    });
                }
            },
            Err(e) => {
                if attempt < max_attempts {
                    log::warn!("  body read failed, re-fetching...\n  url: {url}\n  error: {e}");
                    continue;
                }
                return Err(ClientError::Http(e));
            }
        }
    }

    unreachable!("send_json retry loop exited without returning")
}

/// Whether the status indicates throttling.
///
/// Nominatim signals abuse blocks with 403 rather than 429, so both count.
fn is_throttled(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status == reqwest::StatusCode::FORBIDDEN
}

/// Whether a connection-level error is worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_statuses() {
        assert!(is_throttled(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_throttled(reqwest::StatusCode::FORBIDDEN));
        assert!(!is_throttled(reqwest::StatusCode::BAD_REQUEST));
        assert!(!is_throttled(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
    }
}
