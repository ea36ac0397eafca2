//! Country registry — loads all country definitions from embedded TOML.
//!
//! Each `.toml` file in `packages/source/src/countries/` is baked into
//! the binary at compile time via [`include_str!`]. Adding a country is a
//! matter of creating a new TOML file and adding it to the list below.

use serde::Deserialize;

/// One country's harvest configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CountryDef {
    /// Canonical country name — the cache key and the region-match term.
    pub name: String,
    /// Local-language names beyond the built-in alias table.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Country bounding region as `[south, west, north, east]` degrees.
    pub bbox: [f64; 4],
    /// Whether the random-sampling tier may be used once the other tiers
    /// are exhausted.
    #[serde(default)]
    pub random_sampling: bool,
    /// Known high-density boxes, queried before anything else. Used for
    /// countries whose administrative-boundary data is unreliable.
    #[serde(default)]
    pub hotspots: Vec<Hotspot>,
    /// Population centers, queried highest-population first.
    #[serde(default)]
    pub cities: Vec<City>,
}

/// A known dense bounding box.
#[derive(Debug, Clone, Deserialize)]
pub struct Hotspot {
    /// Stable identifier for the `sources_queried` ledger.
    pub label: String,
    /// Box as `[south, west, north, east]` degrees.
    pub bbox: [f64; 4],
}

/// A population center.
#[derive(Debug, Clone, Deserialize)]
pub struct City {
    /// City name — also the source identifier.
    pub name: String,
    /// Centroid latitude.
    pub lat: f64,
    /// Centroid longitude.
    pub lon: f64,
    /// Population, for tier ordering.
    pub population: u64,
}

// ── Compile-time embedded TOML files ────────────────────────────────

const COUNTRY_TOMLS: &[(&str, &str)] = &[
    ("united_states", include_str!("countries/united_states.toml")),
    (
        "united_kingdom",
        include_str!("countries/united_kingdom.toml"),
    ),
    ("germany", include_str!("countries/germany.toml")),
    ("france", include_str!("countries/france.toml")),
    ("japan", include_str!("countries/japan.toml")),
    ("brazil", include_str!("countries/brazil.toml")),
    ("nigeria", include_str!("countries/nigeria.toml")),
    ("singapore", include_str!("countries/singapore.toml")),
];

#[cfg(test)]
const EXPECTED_COUNTRY_COUNT: usize = 8;

/// Returns all configured countries, parsed from embedded TOML.
///
/// # Panics
///
/// Panics if any TOML config is malformed (this is a compile-time
/// guarantee since the configs are embedded).
#[must_use]
pub fn all_countries() -> Vec<CountryDef> {
    COUNTRY_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse country '{name}': {e}"))
        })
        .collect()
}

/// Looks up one country by canonical name (case-insensitive).
#[must_use]
pub fn country(name: &str) -> Option<CountryDef> {
    all_countries()
        .into_iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
}
