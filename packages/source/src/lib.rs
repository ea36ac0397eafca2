#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Candidate address sourcing.
//!
//! Produces ordered batches of raw address candidates for a country via
//! three escalating tiers, each skipping source identifiers the cache has
//! already seen:
//!
//! 1. **Dense hotspots** — static boxes from the registry, for countries
//!    whose administrative data is unreliable.
//! 2. **Population centers** — the registry's cities, highest population
//!    first, each expanded to a ~10 km box. The primary tier.
//! 3. **Random sampling** — deterministic seeded points inside the
//!    country's bounding region, only for countries flagged for it.
//!
//! Every tier issues one Overpass query per area and assembles the
//! returned features into display strings ([`assemble`]). Validation is
//! entirely the gate's job — this crate only produces text.

pub mod assemble;
pub mod progress;
pub mod registry;

use std::collections::BTreeSet;
use std::hash::{DefaultHasher, Hash, Hasher};

use address_harvest_client::{BoundingBox, ClientError, FeatureQuery, Geocoder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use registry::CountryDef;

/// Half-width of the box around a city centroid.
const CITY_RADIUS_KM: f64 = 10.0;

/// Half-width of the box around a random sample point.
const RANDOM_RADIUS_KM: f64 = 5.0;

/// Number of random sample points per flagged country.
const RANDOM_POINTS: usize = 8;

/// Default feature ceiling per Overpass query.
const DEFAULT_BATCH_LIMIT: usize = 60;

/// Errors from candidate sourcing.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The map-feature query (or a reverse lookup) failed.
    #[error("map feature query failed: {0}")]
    Query(#[from] ClientError),
}

/// One queryable area with its stable source identifier.
#[derive(Debug, Clone)]
pub struct QueryArea {
    /// Identifier recorded in `sources_queried` (e.g., `"city:Berlin"`).
    pub id: String,
    /// The area to query.
    pub bbox: BoundingBox,
    /// City-name context for display-text assembly, when known.
    pub city_hint: Option<String>,
}

/// One batch of raw candidates from a single source area.
#[derive(Debug, Clone)]
pub struct CandidateBatch {
    /// The area's source identifier, to be recorded as queried.
    pub source_id: String,
    /// Assembled display strings, unvalidated.
    pub candidates: Vec<String>,
}

/// Plans the remaining query areas for `country`, tier order preserved,
/// skipping identifiers in `already_queried`.
///
/// Random-tier points are seeded from the country name and point index,
/// so a resumed run plans the exact same areas and the skip ledger stays
/// meaningful.
#[must_use]
pub fn plan_areas(country: &CountryDef, already_queried: &BTreeSet<String>) -> Vec<QueryArea> {
    let mut areas = Vec::new();

    for hotspot in &country.hotspots {
        let [south, west, north, east] = hotspot.bbox;
        areas.push(QueryArea {
            id: format!("hotspot:{}", hotspot.label),
            bbox: BoundingBox {
                south,
                west,
                north,
                east,
            },
            city_hint: None,
        });
    }

    let mut cities: Vec<_> = country.cities.iter().collect();
    cities.sort_by(|a, b| b.population.cmp(&a.population));
    for city in cities {
        areas.push(QueryArea {
            id: format!("city:{}", city.name),
            bbox: BoundingBox::around(city.lat, city.lon, CITY_RADIUS_KM),
            city_hint: Some(city.name.clone()),
        });
    }

    if country.random_sampling {
        let [south, west, north, east] = country.bbox;
        for index in 0..RANDOM_POINTS {
            let mut rng = StdRng::seed_from_u64(sample_seed(&country.name, index));
            let lat = rng.gen_range(south..north);
            let lon = rng.gen_range(west..east);
            areas.push(QueryArea {
                id: format!("random:{index}"),
                bbox: BoundingBox::around(lat, lon, RANDOM_RADIUS_KM),
                city_hint: None,
            });
        }
    }

    areas.retain(|area| !already_queried.contains(&area.id));
    areas
}

/// Stable seed for random sample point `index` of `country_name`.
fn sample_seed(country_name: &str, index: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    country_name.hash(&mut hasher);
    index.hash(&mut hasher);
    hasher.finish()
}

/// Batch producer for the orchestrator.
pub struct CandidateSource<'a> {
    query: &'a dyn FeatureQuery,
    reverse_geocoder: Option<&'a dyn Geocoder>,
    batch_limit: usize,
}

impl<'a> CandidateSource<'a> {
    /// Creates a source over the given map-feature service.
    #[must_use]
    pub const fn new(query: &'a dyn FeatureQuery) -> Self {
        Self {
            query,
            reverse_geocoder: None,
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    /// Enables reverse-geocode fallback for features whose tags carry
    /// nothing address-like. Costs one geocoder call per such feature, so
    /// it is configuration-gated upstream.
    #[must_use]
    pub const fn with_reverse_fallback(mut self, geocoder: &'a dyn Geocoder) -> Self {
        self.reverse_geocoder = Some(geocoder);
        self
    }

    /// Overrides the per-query feature ceiling.
    #[must_use]
    pub const fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Fetches the next unqueried area's candidates.
    ///
    /// Returns `Ok(None)` when every area in every tier has been queried
    /// — the country is exhausted from the source's point of view.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the map-feature query fails after
    /// retries. Reverse-lookup failures only drop the individual feature
    /// unless they are permanent.
    pub async fn next_batch(
        &self,
        country: &CountryDef,
        already_queried: &BTreeSet<String>,
    ) -> Result<Option<CandidateBatch>, SourceError> {
        let Some(area) = plan_areas(country, already_queried).into_iter().next() else {
            return Ok(None);
        };

        log::info!("{}: querying {}", country.name, area.id);
        let features = self.query.features_in(&area.bbox, self.batch_limit).await?;

        let mut candidates = Vec::new();
        for feature in &features {
            if let Some(text) =
                assemble::display_text(feature, area.city_hint.as_deref(), &country.name)
            {
                candidates.push(text);
            } else if let Some(geocoder) = self.reverse_geocoder {
                match geocoder.reverse(feature.lat, feature.lon).await {
                    Ok(Some(text)) => candidates.push(text),
                    Ok(None) => {}
                    Err(e) if e.is_retryable() => {
                        log::debug!("reverse lookup skipped: {e}");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        log::info!(
            "{}: {} -> {} candidates from {} features",
            country.name,
            area.id,
            candidates.len(),
            features.len()
        );
        Ok(Some(CandidateBatch {
            source_id: area.id,
            candidates,
        }))
    }
}
