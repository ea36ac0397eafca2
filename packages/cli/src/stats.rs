//! Read-only cache summary for the `stats` subcommand.

use std::path::Path;

use address_harvest_cache::CacheStore;
use address_harvest_models::CountryStatus;

use crate::orchestrator::target_from_env;

/// Prints per-country counts, mean quality, and status, plus the
/// exhausted and failed lists.
///
/// # Errors
///
/// Returns an error when the cache exists but is unreadable from both
/// the canonical path and the backup.
pub fn run(cache_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = CacheStore::new(cache_path);
    let target = target_from_env();
    let state = store.load(target)?;

    if state.countries.is_empty() {
        println!("Cache {} is empty", cache_path.display());
        return Ok(());
    }

    println!("{:<24} {:>8} {:>8}  Status", "Country", "Accepted", "Quality");
    for (name, progress) in &state.countries {
        let mean_quality = if progress.accepted.is_empty() {
            "-".to_string()
        } else {
            let sum: f64 = progress.accepted.iter().map(|r| r.quality_score).sum();
            #[allow(clippy::cast_precision_loss)]
            let mean = sum / progress.accepted.len() as f64;
            format!("{mean:.2}")
        };
        println!(
            "{name:<24} {:>8} {mean_quality:>8}  {}",
            progress.accepted.len(),
            progress.status
        );
    }

    println!();
    println!(
        "{}/{} countries at target ({target})",
        state.completed_count(target),
        state.total_countries,
    );

    let exhausted: Vec<&str> = state
        .countries
        .values()
        .filter(|p| p.status == CountryStatus::Exhausted)
        .map(|p| p.country_name.as_str())
        .collect();
    if !exhausted.is_empty() {
        println!("Needs manual work: {}", exhausted.join(", "));
    }
    if !state.failed.is_empty() {
        let failed: Vec<&str> = state.failed.iter().map(String::as_str).collect();
        println!("Failed last run: {}", failed.join(", "));
    }

    Ok(())
}
