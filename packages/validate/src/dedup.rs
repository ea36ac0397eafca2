//! Per-country deduplication over two normalization strengths.

use std::collections::BTreeSet;

use address_harvest_models::AddressRecord;

/// Accepted-address keys for one country.
///
/// A candidate is admitted only when **both** its strict and loose forms
/// are new. Loose alone misses reworded duplicates; strict alone would
/// admit a punctuation variant whose strict form happens to differ (rare
/// tag garbage), so both sets are consulted.
#[derive(Debug, Default)]
pub struct DedupSets {
    loose: BTreeSet<String>,
    strict: BTreeSet<String>,
}

impl DedupSets {
    /// Empty sets for a fresh country.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            loose: BTreeSet::new(),
            strict: BTreeSet::new(),
        }
    }

    /// Rebuilds sets from already-accepted records (resume path).
    #[must_use]
    pub fn from_records(records: &[AddressRecord]) -> Self {
        let mut sets = Self::new();
        for record in records {
            sets.loose.insert(record.loose_normalized.clone());
            sets.strict.insert(record.strict_normalized.clone());
        }
        sets
    }

    /// Admits `record` if it is not a duplicate, recording both forms.
    /// Returns `false` for duplicates, leaving the sets untouched.
    pub fn admit(&mut self, record: &AddressRecord) -> bool {
        if self.strict.contains(&record.strict_normalized)
            || self.loose.contains(&record.loose_normalized)
        {
            return false;
        }
        self.loose.insert(record.loose_normalized.clone());
        self.strict.insert(record.strict_normalized.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize;

    fn record(text: &str) -> AddressRecord {
        AddressRecord {
            text: text.to_string(),
            quality_score: 1.0,
            loose_normalized: normalize::loose(text),
            strict_normalized: normalize::strict(text),
        }
    }

    #[test]
    fn admits_distinct_addresses() {
        let mut sets = DedupSets::new();
        assert!(sets.admit(&record("12 Main Street, Springfield, USA")));
        assert!(sets.admit(&record("14 Main Street, Springfield, USA")));
    }

    #[test]
    fn rejects_punctuation_variant() {
        let mut sets = DedupSets::new();
        assert!(sets.admit(&record("12 Main Street, Springfield, USA")));
        assert!(!sets.admit(&record("12  Main Street , Springfield, USA.")));
    }

    #[test]
    fn rejects_reworded_duplicate() {
        let mut sets = DedupSets::new();
        assert!(sets.admit(&record("12 Main St, Springfield, USA")));
        assert!(!sets.admit(&record("Main Street 12, Springfield, USA")));
    }

    #[test]
    fn resume_path_rejects_previously_accepted() {
        let accepted = vec![record("12 Main Street, Springfield, USA")];
        let mut sets = DedupSets::from_records(&accepted);
        assert!(!sets.admit(&record("12 Main Street, Springfield, USA")));
        assert!(sets.admit(&record("7 Oak Avenue, Springfield, USA")));
    }

    #[test]
    fn accepted_strict_forms_stay_unique() {
        let mut sets = DedupSets::new();
        let candidates = [
            "12 Main St, Springfield, USA",
            "Main Street 12, Springfield, USA",
            "12 Main Street, Springfield, USA",
            "9 Elm Road, Springfield, USA",
        ];
        let mut admitted = Vec::new();
        for text in candidates {
            let rec = record(text);
            if sets.admit(&rec) {
                admitted.push(rec);
            }
        }
        let strict_forms: BTreeSet<&str> = admitted
            .iter()
            .map(|r| r.strict_normalized.as_str())
            .collect();
        assert_eq!(strict_forms.len(), admitted.len());
    }
}
