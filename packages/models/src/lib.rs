#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared data model for the address harvest pipeline.
//!
//! The pipeline discovers candidate street addresses per country, validates
//! them, and persists accepted records into a resumable per-country cache.
//! This crate defines the in-memory state ([`CacheState`], [`CountryProgress`],
//! [`AddressRecord`]) and the on-disk wire format ([`CacheFile`]) shared by
//! the cache store, the orchestrator, and the `stats` reporting command.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Current version of the persisted cache schema.
///
/// Version 1 files predate the resumable pipeline and lack the
/// `citiesProcessed` and `manualWorkNeeded` sections; they are upgraded
/// in place by the cache store's migration at load time.
pub const SCHEMA_VERSION: u32 = 2;

/// Processing state of one country's harvest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CountryStatus {
    /// Below target and sources remain to try.
    InProgress,
    /// Reached the target accepted count.
    Complete,
    /// Every available source was queried and the target was still unmet.
    /// Terminal — never retried automatically.
    Exhausted,
}

/// One accepted, validated address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRecord {
    /// Full display address as assembled from map data.
    pub text: String,
    /// Geocoder confirmation score in `[0, 1]`, derived from the matched
    /// place's bounding-box area (smaller area = more precise = higher).
    pub quality_score: f64,
    /// Lightly normalized form (punctuation/case collapsed) for loose dedup.
    pub loose_normalized: String,
    /// Aggressively normalized form (token-order and abbreviation
    /// insensitive) for strong dedup. Unique within a country's accepted set.
    pub strict_normalized: String,
}

/// Per-country progress — the unit of resumable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryProgress {
    /// Stable country identifier (the registry's canonical name).
    pub country_name: String,
    /// Accepted records, capped at the per-country target.
    pub accepted: Vec<AddressRecord>,
    /// Identifiers of candidate sources already queried for this country
    /// (e.g., `"city:Berlin"`), so re-runs never repeat work.
    pub sources_queried: BTreeSet<String>,
    /// Current processing state.
    pub status: CountryStatus,
}

impl CountryProgress {
    /// Creates empty progress for `country_name` in the `InProgress`
    /// state.
    #[must_use]
    pub fn new(country_name: impl Into<String>) -> Self {
        Self {
            country_name: country_name.into(),
            accepted: Vec::new(),
            sources_queried: BTreeSet::new(),
            status: CountryStatus::InProgress,
        }
    }

    /// Returns `true` once the accepted count has reached `target`.
    #[must_use]
    pub fn at_target(&self, target: usize) -> bool {
        self.accepted.len() >= target
    }

    /// Recomputes `status` from the accepted count. Does not touch
    /// `Exhausted` — that transition is terminal and set explicitly by the
    /// orchestrator.
    pub fn refresh_status(&mut self, target: usize) {
        if self.status == CountryStatus::Exhausted {
            return;
        }
        self.status = if self.at_target(target) {
            CountryStatus::Complete
        } else {
            CountryStatus::InProgress
        };
    }
}

/// Process-wide harvest state, persisted across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheState {
    /// Per-country progress, keyed by canonical country name.
    pub countries: BTreeMap<String, CountryProgress>,
    /// Countries in the `Exhausted` status, mirrored for O(1) skip checks.
    pub exhausted: BTreeSet<String>,
    /// Countries whose last batch failed with an unrecoverable error.
    pub failed: BTreeSet<String>,
    /// When this state was first generated.
    pub generated_at: DateTime<Utc>,
    /// Denominator for progress reporting.
    pub total_countries: usize,
}

impl CacheState {
    /// Creates an empty state stamped with the current time.
    #[must_use]
    pub fn empty(total_countries: usize) -> Self {
        Self {
            countries: BTreeMap::new(),
            exhausted: BTreeSet::new(),
            failed: BTreeSet::new(),
            generated_at: Utc::now(),
            total_countries,
        }
    }

    /// Returns the progress entry for `country`, creating it if absent.
    pub fn progress_mut(&mut self, country: &str) -> &mut CountryProgress {
        self.countries
            .entry(country.to_string())
            .or_insert_with(|| CountryProgress::new(country))
    }

    /// Marks `country` as exhausted: terminal status plus the skip mirror.
    pub fn mark_exhausted(&mut self, country: &str) {
        self.progress_mut(country).status = CountryStatus::Exhausted;
        self.exhausted.insert(country.to_string());
    }

    /// Records a country whose batch failed unrecoverably.
    pub fn mark_failed(&mut self, country: &str) {
        self.failed.insert(country.to_string());
    }

    /// Whether a fresh run should skip `country` entirely.
    ///
    /// `Complete` and `Exhausted` countries are skipped. `Exhausted` is
    /// never retried *automatically*; `force` is the explicit operator
    /// override that re-processes both settled states.
    #[must_use]
    pub fn should_skip(&self, country: &str, target: usize, force: bool) -> bool {
        if force {
            return false;
        }
        if self.exhausted.contains(country) {
            return true;
        }
        self.countries.get(country).is_some_and(|progress| {
            progress.status == CountryStatus::Exhausted || progress.at_target(target)
        })
    }

    /// Number of countries that have reached the target.
    #[must_use]
    pub fn completed_count(&self, target: usize) -> usize {
        self.countries
            .values()
            .filter(|p| p.at_target(target))
            .count()
    }
}

/// On-disk JSON shape of the cache.
///
/// Field names are part of the wire contract — downstream consumers read
/// this file directly. `citiesProcessed` and `manualWorkNeeded` arrived with
/// schema version 2 (the resumable pipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheFile {
    /// Schema version; see [`SCHEMA_VERSION`].
    pub schema_version: u32,
    /// Accepted addresses per country.
    pub addresses: BTreeMap<String, Vec<AddressRecord>>,
    /// When the cache was first generated.
    pub generated_at: DateTime<Utc>,
    /// Denominator for progress reporting.
    pub total_countries: usize,
    /// Number of countries with at least one accepted address.
    pub cached_countries: usize,
    /// Countries whose last batch failed unrecoverably.
    pub failed_countries: Vec<String>,
    /// Source identifiers already queried, per country.
    pub cities_processed: BTreeMap<String, Vec<String>>,
    /// Exhausted countries needing manual attention.
    pub manual_work_needed: Vec<String>,
}

impl CacheFile {
    /// Serializes in-memory state into the wire shape.
    #[must_use]
    pub fn from_state(state: &CacheState) -> Self {
        let addresses: BTreeMap<String, Vec<AddressRecord>> = state
            .countries
            .iter()
            .map(|(name, progress)| (name.clone(), progress.accepted.clone()))
            .collect();
        let cities_processed: BTreeMap<String, Vec<String>> = state
            .countries
            .iter()
            .filter(|(_, progress)| !progress.sources_queried.is_empty())
            .map(|(name, progress)| {
                (
                    name.clone(),
                    progress.sources_queried.iter().cloned().collect(),
                )
            })
            .collect();
        let cached_countries = addresses.values().filter(|a| !a.is_empty()).count();

        Self {
            schema_version: SCHEMA_VERSION,
            addresses,
            generated_at: state.generated_at,
            total_countries: state.total_countries,
            cached_countries,
            failed_countries: state.failed.iter().cloned().collect(),
            cities_processed,
            manual_work_needed: state.exhausted.iter().cloned().collect(),
        }
    }

    /// Rebuilds in-memory state from the wire shape.
    ///
    /// Statuses are derived: countries listed in `manualWorkNeeded` are
    /// `Exhausted`; countries at or above `target` are `Complete`; the rest
    /// are `InProgress`.
    #[must_use]
    pub fn into_state(self, target: usize) -> CacheState {
        let exhausted: BTreeSet<String> = self.manual_work_needed.into_iter().collect();
        let mut countries: BTreeMap<String, CountryProgress> = BTreeMap::new();

        for (name, accepted) in self.addresses {
            let mut progress = CountryProgress::new(name.clone());
            progress.accepted = accepted;
            progress.refresh_status(target);
            countries.insert(name, progress);
        }
        for (name, sources) in self.cities_processed {
            let progress = countries
                .entry(name.clone())
                .or_insert_with(|| CountryProgress::new(name));
            progress.sources_queried = sources.into_iter().collect();
        }
        for name in &exhausted {
            let progress = countries
                .entry(name.clone())
                .or_insert_with(|| CountryProgress::new(name.clone()));
            progress.status = CountryStatus::Exhausted;
        }

        CacheState {
            countries,
            exhausted,
            failed: self.failed_countries.into_iter().collect(),
            generated_at: self.generated_at,
            total_countries: self.total_countries,
        }
    }
}
