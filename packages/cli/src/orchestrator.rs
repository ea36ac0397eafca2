//! The country-loop orchestrator.
//!
//! Drives candidate sourcing, validation, dedup, and persistence for one
//! country at a time: `Pending → InProgress → {Complete | Exhausted}`.
//! State is persisted after every country (not every candidate, to bound
//! write amplification) and once more on interrupt, so a killed run
//! resumes where it stopped without re-fetching finished work.
//!
//! Candidate-level rejects never abort a country; an unrecoverable
//! service failure fails only the current country's batch, records it in
//! the failed list, and the run moves on.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use address_harvest_cache::{CacheError, CacheStore};
use address_harvest_cli_utils::{IndicatifProgress, MultiProgress};
use address_harvest_client::config::ClientConfig;
use address_harvest_client::nominatim::NominatimClient;
use address_harvest_client::overpass::OverpassClient;
use address_harvest_client::Geocoder;
use address_harvest_models::{CacheState, CountryProgress, CountryStatus};
use address_harvest_source::progress::ProgressCallback;
use address_harvest_source::registry::{self, CountryDef};
use address_harvest_source::{CandidateSource, SourceError};
use address_harvest_validate::confirm::DEFAULT_ACCEPT_THRESHOLD;
use address_harvest_validate::dedup::DedupSets;
use address_harvest_validate::validate;

/// Default accepted-address target per country.
const DEFAULT_TARGET: usize = 15;

/// Resolved run options.
pub struct RunOptions {
    /// Re-process countries already at target.
    pub force: bool,
    /// Accepted-address target per country.
    pub target: usize,
    /// Geocoder acceptance threshold.
    pub threshold: f64,
}

/// Tallies reported at the end of a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Countries that reached the target this run.
    pub completed: usize,
    /// Countries that ran out of sources this run.
    pub exhausted: usize,
    /// Countries whose batch failed unrecoverably this run.
    pub failed: usize,
    /// Whether the run stopped on an interrupt signal.
    pub interrupted: bool,
}

/// How one country's harvest ended.
enum CountryOutcome {
    /// Reached the target.
    Completed,
    /// Every source tried, target unmet — terminal.
    Exhausted,
    /// A batch hiccuped transiently; left in progress for a future run.
    Stalled,
    /// The interrupt flag went up mid-country.
    Interrupted,
    /// Unrecoverable service failure for this country's batch.
    Failed(String),
}

/// Per-country target from the environment (`TARGET_PER_COUNTRY`).
pub(crate) fn target_from_env() -> usize {
    std::env::var("TARGET_PER_COUNTRY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TARGET)
}

/// Acceptance threshold from the environment (`ACCEPT_THRESHOLD`).
fn threshold_from_env() -> f64 {
    std::env::var("ACCEPT_THRESHOLD")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_ACCEPT_THRESHOLD)
}

/// Boolean environment flag, defaulting to enabled.
fn env_enabled(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true)
}

/// Entry point for the `run` subcommand: wires configuration, clients,
/// signal handling, and progress, then drives [`harvest`].
///
/// # Errors
///
/// Returns an error (and a non-zero exit) only for unrecoverable startup
/// conditions: missing contact configuration, or a cache file that is
/// unreadable from both the canonical path and the backup.
pub async fn run_command(
    multi: &MultiProgress,
    force: bool,
    cache_path: &Path,
    target_override: Option<usize>,
    threshold_override: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client_config = ClientConfig::from_env()?;
    let options = RunOptions {
        force,
        target: target_override.unwrap_or_else(target_from_env),
        threshold: threshold_override.unwrap_or_else(threshold_from_env),
    };

    let store = CacheStore::new(cache_path);
    let mut state = store.load(options.target)?;

    let overpass = OverpassClient::new(&client_config)?;
    let nominatim = NominatimClient::new(&client_config)?;
    let mut source = CandidateSource::new(&overpass);
    if env_enabled("REVERSE_GEOCODE") {
        source = source.with_reverse_fallback(&nominatim);
    }

    let countries = registry::all_countries();

    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupt);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupt received — finishing the current step, then flushing");
                flag.store(true, Ordering::Relaxed);
            }
        });
    }

    let progress =
        IndicatifProgress::countries_bar(multi, "Countries", countries.len() as u64);

    let summary = harvest(
        &store,
        &mut state,
        &countries,
        &source,
        &nominatim,
        &options,
        &interrupt,
        &*progress,
    )
    .await?;

    log::info!(
        "Run finished: {} complete this run, {} exhausted, {} failed, {}/{} countries at target",
        summary.completed,
        summary.exhausted,
        summary.failed,
        state.completed_count(options.target),
        state.total_countries,
    );

    Ok(())
}

/// Runs the harvest loop over `countries`, persisting after each one.
///
/// # Errors
///
/// Returns [`CacheError`] if persisting state fails — losing accepted
/// records is the one thing this loop must never do silently.
#[allow(clippy::too_many_arguments)]
pub async fn harvest(
    store: &CacheStore,
    state: &mut CacheState,
    countries: &[CountryDef],
    source: &CandidateSource<'_>,
    geocoder: &dyn Geocoder,
    options: &RunOptions,
    interrupt: &AtomicBool,
    progress: &dyn ProgressCallback,
) -> Result<RunSummary, CacheError> {
    state.total_countries = countries.len();
    progress.set_total(countries.len() as u64);

    let mut summary = RunSummary::default();

    for country in countries {
        if interrupt.load(Ordering::Relaxed) {
            summary.interrupted = true;
            break;
        }
        if state.should_skip(&country.name, options.target, false) {
            if options.force {
                // Explicit operator override: rebuild from scratch.
                log::info!("{}: re-processing (--force)", country.name);
                state.exhausted.remove(&country.name);
                state.failed.remove(&country.name);
                let entry = state.progress_mut(&country.name);
                entry.accepted.clear();
                entry.sources_queried.clear();
                entry.status = CountryStatus::InProgress;
            } else {
                log::info!("{}: already settled, skipping", country.name);
                progress.inc(1);
                continue;
            }
        }

        progress.set_message(country.name.clone());
        let mut entry = state.progress_mut(&country.name).clone();
        let outcome =
            harvest_country(&mut entry, country, source, geocoder, options, interrupt).await;
        let accepted = entry.accepted.len();
        *state.progress_mut(&country.name) = entry;

        match outcome {
            CountryOutcome::Completed => {
                summary.completed += 1;
                log::info!("{}: complete ({accepted} accepted)", country.name);
            }
            CountryOutcome::Exhausted => {
                state.mark_exhausted(&country.name);
                summary.exhausted += 1;
                log::warn!(
                    "{}: exhausted with {accepted}/{} accepted — flagged for manual work",
                    country.name,
                    options.target,
                );
            }
            CountryOutcome::Failed(message) => {
                state.mark_failed(&country.name);
                summary.failed += 1;
                log::error!("{}: batch failed: {message}", country.name);
            }
            CountryOutcome::Stalled => {
                log::warn!(
                    "{}: stalled at {accepted}/{} accepted, will resume next run",
                    country.name,
                    options.target,
                );
            }
            CountryOutcome::Interrupted => summary.interrupted = true,
        }

        store.save(state)?;
        progress.inc(1);

        if summary.interrupted {
            break;
        }
    }

    if summary.interrupted {
        log::warn!("Interrupted — flushing cache to {}", store.path().display());
        match store.save(state) {
            Ok(()) => log::warn!("Cache flush succeeded"),
            Err(e) => {
                log::error!("Cache flush failed: {e}");
                return Err(e);
            }
        }
    }

    progress.finish(format!(
        "{} complete, {} exhausted, {} failed",
        summary.completed, summary.exhausted, summary.failed
    ));
    Ok(summary)
}

/// Harvests one country until target, exhaustion, failure, or interrupt.
async fn harvest_country(
    entry: &mut CountryProgress,
    country: &CountryDef,
    source: &CandidateSource<'_>,
    geocoder: &dyn Geocoder,
    options: &RunOptions,
    interrupt: &AtomicBool,
) -> CountryOutcome {
    let mut dedup = DedupSets::from_records(&entry.accepted);

    let outcome = 'country: loop {
        if entry.at_target(options.target) {
            break CountryOutcome::Completed;
        }
        if interrupt.load(Ordering::Relaxed) {
            break CountryOutcome::Interrupted;
        }

        match source.next_batch(country, &entry.sources_queried).await {
            Ok(None) => break CountryOutcome::Exhausted,
            Ok(Some(batch)) => {
                entry.sources_queried.insert(batch.source_id.clone());
                for candidate in &batch.candidates {
                    if entry.at_target(options.target) {
                        break;
                    }
                    match validate(
                        candidate,
                        &country.name,
                        &country.aliases,
                        geocoder,
                        options.threshold,
                    )
                    .await
                    {
                        Ok(record) => {
                            if dedup.admit(&record) {
                                log::info!(
                                    "{}: accepted ({:.1}) {}",
                                    country.name,
                                    record.quality_score,
                                    record.text
                                );
                                entry.accepted.push(record);
                            } else {
                                log::debug!("{}: duplicate: {candidate}", country.name);
                            }
                        }
                        Err(reason) if reason.is_fatal() => {
                            break 'country CountryOutcome::Failed(reason.to_string());
                        }
                        Err(reason) if reason.is_transient() => {
                            log::debug!("{}: transient, skipping candidate: {reason}", country.name);
                        }
                        Err(reason) => {
                            log::debug!("{}: rejected: {reason}", country.name);
                        }
                    }
                }
            }
            Err(SourceError::Query(e)) if !e.is_retryable() => {
                break CountryOutcome::Failed(e.to_string());
            }
            Err(e) => {
                log::warn!("{}: batch failed transiently: {e}", country.name);
                break CountryOutcome::Stalled;
            }
        }
    };

    entry.refresh_status(options.target);
    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;

    use address_harvest_client::{
        BoundingBox, ClientError, FeatureQuery, GeocodeMatch, MapFeature,
    };
    use address_harvest_models::CountryStatus;
    use address_harvest_source::progress::NullProgress;
    use address_harvest_source::registry::City;
    use async_trait::async_trait;

    use super::*;

    fn test_country() -> CountryDef {
        CountryDef {
            name: "Atlantis".to_string(),
            aliases: Vec::new(),
            bbox: [0.0, 0.0, 2.0, 2.0],
            random_sampling: false,
            hotspots: Vec::new(),
            cities: vec![City {
                name: "Poseidonis".to_string(),
                lat: 1.0,
                lon: 1.0,
                population: 50_000,
            }],
        }
    }

    fn feature(number: &str, street: &str) -> MapFeature {
        MapFeature {
            lat: 1.0,
            lon: 1.0,
            tags: [
                ("addr:housenumber".to_string(), number.to_string()),
                ("addr:street".to_string(), street.to_string()),
            ]
            .into_iter()
            .collect(),
        }
    }

    struct MockQuery {
        calls: AtomicUsize,
        features: Vec<MapFeature>,
    }

    impl MockQuery {
        fn returning(features: Vec<MapFeature>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                features,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeatureQuery for MockQuery {
        async fn features_in(
            &self,
            _bbox: &BoundingBox,
            _limit: usize,
        ) -> Result<Vec<MapFeature>, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.features.clone())
        }
    }

    /// Confirms every query at building precision by echoing it back.
    struct EchoGeocoder;

    #[async_trait]
    impl Geocoder for EchoGeocoder {
        async fn search(&self, query: &str) -> Result<Vec<GeocodeMatch>, ClientError> {
            let side_deg = 7.0 / 111_320.0;
            Ok(vec![GeocodeMatch {
                display_name: query.to_string(),
                place_rank: 30,
                bounding_box: [0.0, side_deg, 0.0, side_deg],
            }])
        }

        async fn reverse(&self, _lat: f64, _lon: f64) -> Result<Option<String>, ClientError> {
            Ok(None)
        }
    }

    /// Never confirms anything.
    struct BlindGeocoder;

    #[async_trait]
    impl Geocoder for BlindGeocoder {
        async fn search(&self, _query: &str) -> Result<Vec<GeocodeMatch>, ClientError> {
            Ok(Vec::new())
        }

        async fn reverse(&self, _lat: f64, _lon: f64) -> Result<Option<String>, ClientError> {
            Ok(None)
        }
    }

    /// Fails every search permanently.
    struct BrokenGeocoder;

    #[async_trait]
    impl Geocoder for BrokenGeocoder {
        async fn search(&self, _query: &str) -> Result<Vec<GeocodeMatch>, ClientError> {
            Err(ClientError::Fatal {
                message: "HTTP 400".to_string(),
            })
        }

        async fn reverse(&self, _lat: f64, _lon: f64) -> Result<Option<String>, ClientError> {
            Ok(None)
        }
    }

    fn options(target: usize) -> RunOptions {
        RunOptions {
            force: false,
            target,
            threshold: 0.9,
        }
    }

    #[tokio::test]
    async fn country_completes_and_rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache.json"));
        let query = MockQuery::returning(vec![
            feature("3", "Trident Way"),
            feature("7", "Pearl Road"),
            feature("3", "Trident Way"), // same place, returned twice
        ]);
        let source = CandidateSource::new(&query);
        let countries = vec![test_country()];
        let interrupt = AtomicBool::new(false);
        let opts = options(2);

        let mut state = store.load(opts.target).unwrap();
        let summary = harvest(
            &store,
            &mut state,
            &countries,
            &source,
            &EchoGeocoder,
            &opts,
            &interrupt,
            &NullProgress,
        )
        .await
        .unwrap();

        assert_eq!(summary.completed, 1);
        let progress = &state.countries["Atlantis"];
        assert_eq!(progress.status, CountryStatus::Complete);
        assert_eq!(progress.accepted.len(), 2);
        assert_eq!(query.call_count(), 1);

        // Accepted strict-normalized forms stay unique.
        let strict: BTreeSet<&str> = progress
            .accepted
            .iter()
            .map(|r| r.strict_normalized.as_str())
            .collect();
        assert_eq!(strict.len(), progress.accepted.len());

        // Second run over the persisted state fetches nothing new.
        let mut reloaded = store.load(opts.target).unwrap();
        let summary = harvest(
            &store,
            &mut reloaded,
            &countries,
            &source,
            &EchoGeocoder,
            &opts,
            &interrupt,
            &NullProgress,
        )
        .await
        .unwrap();
        assert_eq!(summary.completed, 0);
        assert_eq!(query.call_count(), 1);
        assert_eq!(reloaded.countries["Atlantis"].accepted.len(), 2);
    }

    #[tokio::test]
    async fn force_rebuilds_a_completed_country() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache.json"));
        let query = MockQuery::returning(vec![
            feature("3", "Trident Way"),
            feature("7", "Pearl Road"),
        ]);
        let source = CandidateSource::new(&query);
        let countries = vec![test_country()];
        let interrupt = AtomicBool::new(false);
        let opts = options(2);

        let mut state = store.load(opts.target).unwrap();
        harvest(
            &store,
            &mut state,
            &countries,
            &source,
            &EchoGeocoder,
            &opts,
            &interrupt,
            &NullProgress,
        )
        .await
        .unwrap();
        assert_eq!(query.call_count(), 1);

        let forced = RunOptions {
            force: true,
            ..options(2)
        };
        let mut reloaded = store.load(forced.target).unwrap();
        let summary = harvest(
            &store,
            &mut reloaded,
            &countries,
            &source,
            &EchoGeocoder,
            &forced,
            &interrupt,
            &NullProgress,
        )
        .await
        .unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(query.call_count(), 2);
        assert_eq!(reloaded.countries["Atlantis"].accepted.len(), 2);
    }

    #[tokio::test]
    async fn unconfirmable_country_exhausts_and_is_never_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache.json"));
        let query = MockQuery::returning(vec![feature("3", "Trident Way")]);
        let source = CandidateSource::new(&query);
        let countries = vec![test_country()];
        let interrupt = AtomicBool::new(false);
        let opts = options(3);

        let mut state = store.load(opts.target).unwrap();
        let summary = harvest(
            &store,
            &mut state,
            &countries,
            &source,
            &BlindGeocoder,
            &opts,
            &interrupt,
            &NullProgress,
        )
        .await
        .unwrap();

        assert_eq!(summary.exhausted, 1);
        assert_eq!(
            state.countries["Atlantis"].status,
            CountryStatus::Exhausted
        );
        assert!(state.exhausted.contains("Atlantis"));
        // The one city was queried exactly once.
        assert_eq!(query.call_count(), 1);

        // The exhausted marker is on disk and skips the country next run.
        let mut reloaded = store.load(opts.target).unwrap();
        assert!(reloaded.exhausted.contains("Atlantis"));
        harvest(
            &store,
            &mut reloaded,
            &countries,
            &source,
            &BlindGeocoder,
            &opts,
            &interrupt,
            &NullProgress,
        )
        .await
        .unwrap();
        assert_eq!(query.call_count(), 1);
    }

    #[tokio::test]
    async fn fatal_service_failure_fails_the_country_not_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache.json"));
        let query = MockQuery::returning(vec![feature("3", "Trident Way")]);
        let source = CandidateSource::new(&query);
        let countries = vec![test_country()];
        let interrupt = AtomicBool::new(false);
        let opts = options(3);

        let mut state = store.load(opts.target).unwrap();
        let summary = harvest(
            &store,
            &mut state,
            &countries,
            &source,
            &BrokenGeocoder,
            &opts,
            &interrupt,
            &NullProgress,
        )
        .await
        .unwrap();

        assert_eq!(summary.failed, 1);
        assert!(state.failed.contains("Atlantis"));

        let reloaded = store.load(opts.target).unwrap();
        assert!(reloaded.failed.contains("Atlantis"));
    }

    #[tokio::test]
    async fn interrupt_before_work_flushes_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache.json"));
        let query = MockQuery::returning(vec![feature("3", "Trident Way")]);
        let source = CandidateSource::new(&query);
        let countries = vec![test_country()];
        let interrupt = AtomicBool::new(true);
        let opts = options(3);

        let mut state = store.load(opts.target).unwrap();
        let summary = harvest(
            &store,
            &mut state,
            &countries,
            &source,
            &EchoGeocoder,
            &opts,
            &interrupt,
            &NullProgress,
        )
        .await
        .unwrap();

        assert!(summary.interrupted);
        assert_eq!(query.call_count(), 0);
        // The flush still happened.
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn partial_progress_resumes_without_repeating_sources() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache.json"));
        let query = MockQuery::returning(vec![feature("3", "Trident Way")]);
        let source = CandidateSource::new(&query);
        let countries = vec![test_country()];
        let interrupt = AtomicBool::new(false);
        let opts = options(5);

        // Seed persisted progress that already covers the only city.
        let mut state = store.load(opts.target).unwrap();
        state
            .progress_mut("Atlantis")
            .sources_queried
            .insert("city:Poseidonis".to_string());
        store.save(&state).unwrap();

        let mut reloaded = store.load(opts.target).unwrap();
        let summary = harvest(
            &store,
            &mut reloaded,
            &countries,
            &source,
            &EchoGeocoder,
            &opts,
            &interrupt,
            &NullProgress,
        )
        .await
        .unwrap();

        // No sources left means the country exhausts without a single
        // repeated query.
        assert_eq!(query.call_count(), 0);
        assert_eq!(summary.exhausted, 1);
    }
}
