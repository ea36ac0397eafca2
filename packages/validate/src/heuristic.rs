//! Structural plausibility checks for raw candidate text.
//!
//! The cheapest gate stage: pure string inspection, no network. Map data
//! produces plenty of fragments that are obviously not full addresses —
//! bare street names, lone postcodes, tag garbage — and rejecting them
//! here keeps them away from the paced geocoder budget entirely.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Minimum candidate length after stripping punctuation.
const MIN_STRIPPED_LEN: usize = 30;

/// Maximum candidate length after stripping punctuation.
const MAX_STRIPPED_LEN: usize = 300;

/// Minimum count of alphabetic characters.
const MIN_ALPHA: usize = 20;

/// Minimum number of comma boundaries (a full display address has at
/// least street, city, country segments).
const MIN_SEPARATORS: usize = 2;

/// Minimum number of distinct characters.
const MIN_DISTINCT: usize = 5;

/// Characters that never appear in a genuine display address.
const DISALLOWED: &[char] = &[
    '<', '>', '{', '}', '[', ']', '|', '\\', '^', '~', '`', '@', '#', '$', '%', '*', '=', '+', ';',
];

/// Regex for a numeric token (house number, possibly with a letter
/// suffix like "12a").
static NUMERIC_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\w*\b").expect("valid regex"));

/// Why a candidate failed the structural heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralFault {
    /// Too short to be a full display address.
    #[error("too short: {len} chars after stripping punctuation")]
    TooShort {
        /// Stripped length.
        len: usize,
    },

    /// Too long — almost certainly concatenated garbage.
    #[error("too long: {len} chars after stripping punctuation")]
    TooLong {
        /// Stripped length.
        len: usize,
    },

    /// Not enough letters for street + city + country.
    #[error("only {count} alphabetic characters")]
    TooFewLetters {
        /// Alphabetic character count.
        count: usize,
    },

    /// Not enough comma-separated segments.
    #[error("only {count} separator boundaries")]
    TooFewSegments {
        /// Comma count.
        count: usize,
    },

    /// No house-number-like token in any segment.
    #[error("no numeric token in any segment")]
    NoNumericToken,

    /// Contains a character from the disallowed set.
    #[error("disallowed character {symbol:?}")]
    DisallowedSymbol {
        /// The offending character.
        symbol: char,
    },

    /// Degenerate repetition (e.g., "aaaaaaa, aaa, 1aa...").
    #[error("only {count} distinct characters")]
    TooFewDistinctChars {
        /// Distinct character count.
        count: usize,
    },
}

/// Runs all structural checks, cheapest first.
///
/// # Errors
///
/// Returns the first failing [`StructuralFault`].
pub fn check(candidate: &str) -> Result<(), StructuralFault> {
    let stripped: String = candidate
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    let stripped_len = stripped.chars().count();
    if stripped_len < MIN_STRIPPED_LEN {
        return Err(StructuralFault::TooShort { len: stripped_len });
    }
    if stripped_len > MAX_STRIPPED_LEN {
        return Err(StructuralFault::TooLong { len: stripped_len });
    }

    let alpha = candidate.chars().filter(|c| c.is_alphabetic()).count();
    if alpha < MIN_ALPHA {
        return Err(StructuralFault::TooFewLetters { count: alpha });
    }

    let separators = candidate.matches(',').count();
    if separators < MIN_SEPARATORS {
        return Err(StructuralFault::TooFewSegments { count: separators });
    }

    if !candidate
        .split(',')
        .any(|segment| NUMERIC_TOKEN_RE.is_match(segment))
    {
        return Err(StructuralFault::NoNumericToken);
    }

    if let Some(symbol) = candidate.chars().find(|c| DISALLOWED.contains(c)) {
        return Err(StructuralFault::DisallowedSymbol { symbol });
    }

    let mut distinct: Vec<char> = candidate.chars().collect();
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() < MIN_DISTINCT {
        return Err(StructuralFault::TooFewDistinctChars {
            count: distinct.len(),
        });
    }

    Ok(())
}
