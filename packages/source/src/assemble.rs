//! Best-effort display-text assembly from raw map features.
//!
//! A feature's tags rarely spell out a full postal address, so the line
//! is built from the best available tag combination — house number +
//! street beats street-only beats a named place beats a bare postcode —
//! and city/region/country context is appended. The result is a
//! *candidate*: whether it is actually a usable address is entirely the
//! validation gate's call, not this module's.

use address_harvest_client::MapFeature;

/// Assembles a display string for `feature`, or `None` when the tags
/// offer nothing address-like at all.
///
/// `city_hint` is the name of the queried area (e.g., the city whose
/// bounding box produced this feature), used when the feature doesn't
/// carry its own `addr:city`.
#[must_use]
pub fn display_text(feature: &MapFeature, city_hint: Option<&str>, country: &str) -> Option<String> {
    let tags = &feature.tags;

    let line = match (tags.get("addr:housenumber"), tags.get("addr:street")) {
        (Some(number), Some(street)) => format!("{number} {street}"),
        (None, Some(street)) => street.clone(),
        _ => tags
            .get("name")
            .or_else(|| tags.get("addr:postcode"))
            .cloned()?,
    };

    let city = tags
        .get("addr:city")
        .map(String::as_str)
        .or(city_hint)
        .map(str::to_string);
    let region = tags
        .get("addr:state")
        .or_else(|| tags.get("addr:province"))
        .or_else(|| tags.get("addr:region"))
        .cloned();

    let mut parts = vec![line];
    parts.extend(city);
    parts.extend(region);
    parts.push(country.to_string());
    Some(parts.join(", "))
}
