//! Geocoder confirmation scoring.
//!
//! The only gate stage that performs I/O. A candidate is submitted to the
//! geocoding service; matches must be specific enough (place rank) and
//! must not introduce numeric tokens the candidate doesn't contain (a
//! match for "14 Main St" confirming "12 Main St" is a different house).
//! The smallest bounding-box area among surviving matches maps to a
//! quality score through fixed breakpoints.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use address_harvest_client::{GeocodeMatch, Geocoder};
use regex::Regex;

use crate::RejectReason;

/// Default acceptance threshold (the stricter pipeline variant uses 1.0).
pub const DEFAULT_ACCEPT_THRESHOLD: f64 = 0.9;

/// Minimum place rank for a match to count as a confirmation. Nominatim
/// rank 26 and above covers streets through individual buildings.
const MIN_PLACE_RANK: u32 = 26;

/// Regex for numeric tokens.
static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Extracts the set of numeric tokens from `text`.
#[must_use]
pub fn numeric_tokens(text: &str) -> BTreeSet<String> {
    DIGITS_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Maps a bounding-box area to a quality score.
///
/// Breakpoints are in square meters: a building footprint scores 1.0, a
/// street block 0.9, and anything larger degrades quickly.
#[must_use]
pub fn score_for_area(area_m2: f64) -> f64 {
    if area_m2 < 100.0 {
        1.0
    } else if area_m2 < 1_000.0 {
        0.9
    } else if area_m2 < 10_000.0 {
        0.8
    } else if area_m2 < 100_000.0 {
        0.7
    } else {
        0.3
    }
}

/// Whether a single match confirms the candidate.
fn confirms(m: &GeocodeMatch, candidate_tokens: &BTreeSet<String>) -> bool {
    m.place_rank >= MIN_PLACE_RANK && numeric_tokens(&m.display_name).is_subset(candidate_tokens)
}

/// Submits `candidate` for geocoding confirmation.
///
/// Returns the quality score on acceptance.
///
/// # Errors
///
/// [`RejectReason::NoMatch`] when no match is specific enough,
/// [`RejectReason::LowScore`] when the best match's area scores below
/// `threshold`, and [`RejectReason::Transient`]/[`RejectReason::Fatal`]
/// for service failures.
pub async fn confirm(
    geocoder: &dyn Geocoder,
    candidate: &str,
    threshold: f64,
) -> Result<f64, RejectReason> {
    let matches = geocoder
        .search(candidate)
        .await
        .map_err(RejectReason::from_client)?;

    let candidate_tokens = numeric_tokens(candidate);
    let min_area = matches
        .iter()
        .filter(|m| confirms(m, &candidate_tokens))
        .map(GeocodeMatch::area_m2)
        .fold(None::<f64>, |best, area| {
            Some(best.map_or(area, |b| b.min(area)))
        });

    let Some(area) = min_area else {
        return Err(RejectReason::NoMatch);
    };

    let score = score_for_area(area);
    if score < threshold {
        return Err(RejectReason::LowScore { score, threshold });
    }
    Ok(score)
}
