//! Two-strength address normalization for deduplication.
//!
//! The map-feature service frequently returns the same physical place
//! through multiple tags and paths, phrased slightly differently each
//! time. Loose normalization catches punctuation/case variants; strict
//! normalization additionally folds token order and common abbreviations
//! so "12 Main St" and "Main Street 12" collapse to one key.

/// Abbreviation folding applied token-wise in strict normalization.
static ABBREVIATIONS: &[(&str, &str)] = &[
    ("st", "street"),
    ("str", "street"),
    ("ave", "avenue"),
    ("av", "avenue"),
    ("rd", "road"),
    ("blvd", "boulevard"),
    ("dr", "drive"),
    ("ln", "lane"),
    ("pl", "place"),
    ("sq", "square"),
    ("hwy", "highway"),
    ("ct", "court"),
    ("n", "north"),
    ("s", "south"),
    ("e", "east"),
    ("w", "west"),
    ("ne", "northeast"),
    ("nw", "northwest"),
    ("se", "southeast"),
    ("sw", "southwest"),
    ("straße", "strasse"),
];

/// Light normalization: lowercase, punctuation collapsed to spaces,
/// whitespace collapsed.
#[must_use]
pub fn loose(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Aggressive normalization: loose form, abbreviations expanded, tokens
/// sorted and deduplicated. Insensitive to word order and phrasing.
#[must_use]
pub fn strict(text: &str) -> String {
    let mut tokens: Vec<String> = loose(text)
        .split_whitespace()
        .map(|token| {
            ABBREVIATIONS
                .iter()
                .find(|(abbr, _)| *abbr == token)
                .map_or_else(|| token.to_string(), |(_, full)| (*full).to_string())
        })
        .collect();
    tokens.sort_unstable();
    tokens.dedup();
    tokens.join(" ")
}
