#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Validation gate for candidate addresses.
//!
//! Three ordered checks, short-circuiting on first failure, cheapest
//! first:
//!
//! 1. **Structural heuristic** ([`heuristic`]) — pure string inspection.
//! 2. **Region match** ([`region`]) — the declared country (or an alias)
//!    must appear in the candidate text. Still purely local.
//! 3. **Geocoder confirmation** ([`confirm`]) — the only network stage;
//!    goes through the rate-limited client and produces the quality
//!    score.
//!
//! A candidate that passes all three becomes an [`AddressRecord`]
//! carrying both normalization forms for the deduplication sets
//! ([`dedup`]).

pub mod confirm;
pub mod dedup;
pub mod heuristic;
pub mod normalize;
pub mod region;

use address_harvest_client::{ClientError, Geocoder};
use address_harvest_models::AddressRecord;
use thiserror::Error;

pub use heuristic::StructuralFault;

/// Why a candidate was rejected.
///
/// `Transient` rejects may be re-queued by the orchestrator; every other
/// variant is terminal for that exact candidate.
#[derive(Debug, Error)]
pub enum RejectReason {
    /// Failed the structural heuristic.
    #[error("structural check failed: {0}")]
    Structure(#[from] StructuralFault),

    /// The declared country is not mentioned in the candidate.
    #[error("declared country {country:?} not found in candidate text")]
    Region {
        /// The country the candidate was harvested for.
        country: String,
    },

    /// No geocoder match of sufficient specificity.
    #[error("no geocoder match with sufficient specificity")]
    NoMatch,

    /// Best match scored below the acceptance threshold.
    #[error("geocoder score {score} below acceptance threshold {threshold}")]
    LowScore {
        /// Computed quality score.
        score: f64,
        /// Configured acceptance threshold.
        threshold: f64,
    },

    /// Network/service hiccup — the candidate itself may still be fine.
    #[error("transient service failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// Unrecoverable service failure — surfaced to the orchestrator,
    /// which fails the country's batch rather than the whole run.
    #[error("unrecoverable service failure: {message}")]
    Fatal {
        /// Description of the failure.
        message: String,
    },
}

impl RejectReason {
    /// Classifies a client error: permanent refusals become [`Self::Fatal`],
    /// everything else (throttling, timeouts, parse noise) is transient
    /// from the candidate's point of view.
    #[must_use]
    pub fn from_client(error: ClientError) -> Self {
        match error {
            ClientError::Fatal { message } => Self::Fatal { message },
            other => Self::Transient {
                message: other.to_string(),
            },
        }
    }

    /// Whether the same candidate may be retried later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether this reject should abort the country's current batch.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

/// Runs the full gate on one candidate.
///
/// `extra_aliases` come from the country registry (local-language names
/// beyond the built-in alias table). Only the third stage performs I/O.
///
/// # Errors
///
/// Returns the first failing stage's [`RejectReason`].
pub async fn validate(
    candidate: &str,
    country: &str,
    extra_aliases: &[String],
    geocoder: &dyn Geocoder,
    threshold: f64,
) -> Result<AddressRecord, RejectReason> {
    heuristic::check(candidate)?;

    if !region::matches(candidate, country, extra_aliases) {
        return Err(RejectReason::Region {
            country: country.to_string(),
        });
    }

    let quality_score = confirm::confirm(geocoder, candidate, threshold).await?;

    Ok(AddressRecord {
        text: candidate.to_string(),
        quality_score,
        loose_normalized: normalize::loose(candidate),
        strict_normalized: normalize::strict(candidate),
    })
}
