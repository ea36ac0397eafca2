#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Crash-safe persistence for the harvest cache.
//!
//! The store is the **only** component that touches the persisted file;
//! everything else works on the in-memory [`CacheState`] handed around by
//! the orchestrator.
//!
//! Write path: serialize to `<path>.tmp`, rotate the current canonical
//! file to `<path>.backup` (best-effort), then rename the temp file over
//! the canonical path — readers never observe a half-written cache.
//!
//! Read path: canonical first, `.backup` on corruption, empty state when
//! neither file exists yet. A cache that exists but is unreadable from
//! *both* paths is a hard error — silently discarding a previous run's
//! work is worse than stopping.
//!
//! Legacy (version-1) files are upgraded once at load by [`migrate`];
//! there are no parallel schema variants.

use std::path::{Path, PathBuf};

use address_harvest_models::{CacheFile, CacheState, SCHEMA_VERSION};
use thiserror::Error;

/// Errors from cache persistence.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Both the canonical file and its backup are unparsable.
    #[error("cache unreadable from both canonical and backup: {}", path.display())]
    Unreadable {
        /// The canonical cache path.
        path: PathBuf,
    },
}

/// Handle to the persisted cache file.
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    /// Creates a store over `path` (nothing is read or written yet).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The canonical cache path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn suffixed(&self, suffix: &str) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(suffix);
        PathBuf::from(os)
    }

    fn backup_path(&self) -> PathBuf {
        self.suffixed(".backup")
    }

    fn tmp_path(&self) -> PathBuf {
        self.suffixed(".tmp")
    }

    /// Loads persisted state, or an empty state when no cache exists yet.
    ///
    /// `target` is the per-country accepted-count target, used to derive
    /// each country's status from its record count.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unreadable`] when a cache file exists but
    /// neither the canonical path nor the backup can be parsed.
    pub fn load(&self, target: usize) -> Result<CacheState, CacheError> {
        let backup = self.backup_path();
        if !self.path.exists() && !backup.exists() {
            log::info!("No cache at {}, starting fresh", self.path.display());
            return Ok(CacheState::empty(0));
        }

        if self.path.exists() {
            match read_file(&self.path) {
                Ok(file) => return Ok(file.into_state(target)),
                Err(e) => {
                    log::warn!(
                        "Cache at {} is unreadable ({e}), trying backup",
                        self.path.display()
                    );
                }
            }
        }

        if backup.exists() {
            match read_file(&backup) {
                Ok(file) => {
                    log::warn!("Recovered cache from backup {}", backup.display());
                    return Ok(file.into_state(target));
                }
                Err(e) => log::error!("Backup {} is also unreadable: {e}", backup.display()),
            }
        }

        Err(CacheError::Unreadable {
            path: self.path.clone(),
        })
    }

    /// Persists `state` atomically, rotating the previous file to
    /// `.backup` first.
    ///
    /// Exhaustion and failure markers already on disk are merged in
    /// rather than overwritten, so an interrupt-triggered flush can never
    /// erase what an earlier run recorded.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] on serialization or filesystem failure.
    /// A failed backup rotation is logged but not fatal.
    pub fn save(&self, state: &CacheState) -> Result<(), CacheError> {
        let mut file = CacheFile::from_state(state);
        if let Ok(on_disk) = read_file(&self.path) {
            merge_markers(&mut file, &on_disk);
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&file)?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, json)?;

        if self.path.exists()
            && let Err(e) = std::fs::copy(&self.path, self.backup_path())
        {
            log::warn!("Backup rotation failed (continuing): {e}");
        }

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Reads and migrates one cache file.
fn read_file(path: &Path) -> Result<CacheFile, CacheError> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    Ok(serde_json::from_value(migrate(value))?)
}

/// Upgrades a legacy cache document to the current schema.
///
/// Version-1 files predate the resumable pipeline: no `schemaVersion`,
/// no `citiesProcessed`, no `manualWorkNeeded`, and sometimes no
/// `failedCountries`. Records themselves have carried the same shape
/// since the beginning, so only the bookkeeping sections are filled in.
#[must_use]
pub fn migrate(mut value: serde_json::Value) -> serde_json::Value {
    let Some(obj) = value.as_object_mut() else {
        return value;
    };
    if obj.contains_key("schemaVersion") {
        return value;
    }

    log::info!("Migrating legacy cache file to schema version {SCHEMA_VERSION}");
    obj.insert("schemaVersion".to_string(), SCHEMA_VERSION.into());
    obj.entry("citiesProcessed")
        .or_insert_with(|| serde_json::json!({}));
    obj.entry("manualWorkNeeded")
        .or_insert_with(|| serde_json::json!([]));
    obj.entry("failedCountries")
        .or_insert_with(|| serde_json::json!([]));
    obj.entry("totalCountries").or_insert_with(|| 0.into());

    let cached = obj
        .get("addresses")
        .and_then(serde_json::Value::as_object)
        .map_or(0, |addresses| {
            addresses
                .values()
                .filter(|list| list.as_array().is_some_and(|a| !a.is_empty()))
                .count()
        });
    obj.entry("cachedCountries").or_insert_with(|| cached.into());
    obj.entry("generatedAt")
        .or_insert_with(|| serde_json::json!(chrono::Utc::now()));

    value
}

/// Unions on-disk failure/exhaustion markers into `file`.
///
/// Only markers for countries the in-memory state does not track are
/// carried over: for tracked countries the state's own verdict wins, so
/// a `--force` re-process can genuinely clear a marker, while markers
/// written by another process for untouched countries survive a flush.
fn merge_markers(file: &mut CacheFile, on_disk: &CacheFile) {
    for country in &on_disk.failed_countries {
        if !file.addresses.contains_key(country) && !file.failed_countries.contains(country) {
            file.failed_countries.push(country.clone());
        }
    }
    for country in &on_disk.manual_work_needed {
        if !file.addresses.contains_key(country) && !file.manual_work_needed.contains(country) {
            file.manual_work_needed.push(country.clone());
        }
    }
    file.failed_countries.sort();
    file.manual_work_needed.sort();
}

#[cfg(test)]
mod tests {
    use address_harvest_models::{AddressRecord, CountryStatus};

    use super::*;

    const TARGET: usize = 15;

    fn record(text: &str) -> AddressRecord {
        AddressRecord {
            text: text.to_string(),
            quality_score: 0.9,
            loose_normalized: text.to_lowercase(),
            strict_normalized: text.to_lowercase(),
        }
    }

    fn sample_state() -> CacheState {
        let mut state = CacheState::empty(8);
        let progress = state.progress_mut("Germany");
        progress
            .accepted
            .push(record("12 Unter den Linden, Berlin, Germany"));
        progress.sources_queried.insert("city:Berlin".to_string());
        state.mark_exhausted("Tuvalu");
        state
    }

    #[test]
    fn missing_cache_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache.json"));
        let state = store.load(TARGET).unwrap();
        assert!(state.countries.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache.json"));
        let state = sample_state();
        store.save(&state).unwrap();

        let loaded = store.load(TARGET).unwrap();
        assert_eq!(loaded.countries["Germany"].accepted.len(), 1);
        assert!(loaded.countries["Germany"]
            .sources_queried
            .contains("city:Berlin"));
        assert!(loaded.exhausted.contains("Tuvalu"));
        assert_eq!(
            loaded.countries["Tuvalu"].status,
            CountryStatus::Exhausted
        );
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let store = CacheStore::new(&path);
        store.save(&sample_state()).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("cache.json.tmp").exists());
    }

    #[test]
    fn second_save_rotates_a_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let store = CacheStore::new(&path);

        let mut state = sample_state();
        store.save(&state).unwrap();
        assert!(!dir.path().join("cache.json.backup").exists());

        state
            .progress_mut("Germany")
            .accepted
            .push(record("7 Marienplatz, Munich, Germany"));
        store.save(&state).unwrap();

        let backup = dir.path().join("cache.json.backup");
        assert!(backup.exists());
        // The backup holds the previous write (one record, not two).
        let previous = read_file(&backup).unwrap();
        assert_eq!(previous.addresses["Germany"].len(), 1);
        let current = read_file(&path).unwrap();
        assert_eq!(current.addresses["Germany"].len(), 2);
    }

    #[test]
    fn corrupt_canonical_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let store = CacheStore::new(&path);
        let state = sample_state();
        store.save(&state).unwrap();
        store.save(&state).unwrap(); // creates the backup

        std::fs::write(&path, "{ this is not json").unwrap();

        let recovered = store.load(TARGET).unwrap();
        assert_eq!(recovered.countries["Germany"].accepted.len(), 1);
    }

    #[test]
    fn both_files_corrupt_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let store = CacheStore::new(&path);
        std::fs::write(&path, "garbage").unwrap();
        std::fs::write(dir.path().join("cache.json.backup"), "also garbage").unwrap();

        assert!(matches!(
            store.load(TARGET),
            Err(CacheError::Unreadable { .. })
        ));
    }

    #[test]
    fn legacy_v1_file_is_migrated_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let legacy = serde_json::json!({
            "addresses": {
                "Germany": [{
                    "text": "12 Unter den Linden, Berlin, Germany",
                    "qualityScore": 1.0,
                    "looseNormalized": "12 unter den linden berlin germany",
                    "strictNormalized": "12 berlin den germany linden unter"
                }]
            },
            "generatedAt": "2025-11-02T10:00:00Z"
        });
        std::fs::write(&path, serde_json::to_string(&legacy).unwrap()).unwrap();

        let store = CacheStore::new(&path);
        let state = store.load(TARGET).unwrap();
        assert_eq!(state.countries["Germany"].accepted.len(), 1);
        assert!(state.countries["Germany"].sources_queried.is_empty());
        assert!(state.exhausted.is_empty());
        assert!(state.failed.is_empty());
    }

    #[test]
    fn save_merges_markers_already_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let store = CacheStore::new(&path);

        let mut earlier = CacheState::empty(8);
        earlier.mark_exhausted("Tuvalu");
        earlier.mark_failed("Atlantis");
        store.save(&earlier).unwrap();

        // A second run that knows nothing of those markers flushes...
        let mut later = CacheState::empty(8);
        later
            .progress_mut("France")
            .accepted
            .push(record("3 Rue de Rivoli, Paris, France"));
        store.save(&later).unwrap();

        // ...and the markers survive.
        let merged = store.load(TARGET).unwrap();
        assert!(merged.exhausted.contains("Tuvalu"));
        assert!(merged.failed.contains("Atlantis"));
        assert_eq!(merged.countries["France"].accepted.len(), 1);
    }

    #[test]
    fn migrate_is_a_no_op_on_current_schema() {
        let current = serde_json::to_value(CacheFile::from_state(&CacheState::empty(1))).unwrap();
        assert_eq!(migrate(current.clone()), current);
    }
}
