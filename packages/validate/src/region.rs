//! Declared-region matching.
//!
//! A candidate harvested for one country must actually mention that
//! country (or a well-known alias — map data renders "United States" as
//! "USA", "Germany" as "Deutschland", and so on). Purely local string
//! comparison; no network.

/// Known aliases per canonical country name.
///
/// Lookup is case-insensitive on the canonical name. Short aliases
/// ("US", "UK") only match on word boundaries, so "Busan" never matches
/// "US".
static COUNTRY_ALIASES: &[(&str, &[&str])] = &[
    (
        "United States",
        &["USA", "US", "United States of America", "America"],
    ),
    (
        "United Kingdom",
        &[
            "UK",
            "Great Britain",
            "England",
            "Scotland",
            "Wales",
            "Northern Ireland",
        ],
    ),
    ("Germany", &["Deutschland"]),
    ("France", &["République française"]),
    ("Spain", &["España"]),
    ("Italy", &["Italia"]),
    ("Netherlands", &["Holland", "Nederland"]),
    ("Switzerland", &["Schweiz", "Suisse", "Svizzera"]),
    ("Austria", &["Österreich"]),
    ("Czechia", &["Czech Republic", "Česko"]),
    ("Poland", &["Polska"]),
    ("Greece", &["Hellas", "Ελλάδα"]),
    ("Japan", &["Nippon", "日本"]),
    ("South Korea", &["Republic of Korea", "Korea"]),
    ("China", &["People's Republic of China", "中国"]),
    ("Russia", &["Russian Federation"]),
    ("Brazil", &["Brasil"]),
    ("Mexico", &["México"]),
    ("United Arab Emirates", &["UAE"]),
    ("Ivory Coast", &["Côte d'Ivoire"]),
    ("Myanmar", &["Burma"]),
    ("Sweden", &["Sverige"]),
    ("Norway", &["Norge"]),
    ("Denmark", &["Danmark"]),
    ("Finland", &["Suomi"]),
];

/// Whether `candidate` mentions `country`, one of its known aliases, or
/// one of the registry-supplied `extra_aliases`.
#[must_use]
pub fn matches(candidate: &str, country: &str, extra_aliases: &[String]) -> bool {
    let haystack = candidate.to_lowercase();

    if contains_term(&haystack, &country.to_lowercase()) {
        return true;
    }

    let table_aliases = COUNTRY_ALIASES
        .iter()
        .find(|(canonical, _)| canonical.eq_ignore_ascii_case(country))
        .map(|(_, aliases)| *aliases)
        .unwrap_or_default();

    table_aliases
        .iter()
        .copied()
        .chain(extra_aliases.iter().map(String::as_str))
        .any(|alias| contains_term(&haystack, &alias.to_lowercase()))
}

/// Substring search requiring non-alphanumeric (or edge) boundaries, so
/// short aliases don't fire inside unrelated words.
fn contains_term(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    haystack.match_indices(term).any(|(start, _)| {
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = haystack[start + term.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_canonical_name() {
        assert!(matches(
            "12 Unter den Linden, Berlin, Germany",
            "Germany",
            &[]
        ));
    }

    #[test]
    fn matches_known_alias() {
        assert!(matches(
            "100 N State St, Chicago, IL, USA",
            "United States",
            &[]
        ));
        assert!(matches(
            "12 Unter den Linden, Berlin, Deutschland",
            "Germany",
            &[]
        ));
    }

    #[test]
    fn short_alias_needs_word_boundaries() {
        // "Busan" contains "us" but is not the United States.
        assert!(!matches(
            "12 Haeundae Beach Road, Busan",
            "United States",
            &[]
        ));
        assert!(matches("12 Main Street, Springfield, US", "United States", &[]));
    }

    #[test]
    fn rejects_missing_country() {
        assert!(!matches("12 Unter den Linden, Berlin", "Germany", &[]));
    }

    #[test]
    fn extra_aliases_extend_the_table() {
        assert!(matches(
            "1 Marina Bay, Singapura",
            "Singapore",
            &["Singapura".to_string()]
        ));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(matches(
            "12 UNTER DEN LINDEN, BERLIN, GERMANY",
            "germany",
            &[]
        ));
    }
}
