#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `address-harvest` — builds a resumable per-country cache of validated
//! real-world addresses from `OpenStreetMap` data.
//!
//! `run` discovers candidates per country (Overpass), validates each one
//! through the structural/region/geocoder gate (Nominatim), deduplicates,
//! and persists progress after every country. Interrupting with Ctrl-C
//! flushes state first, so a later `run` resumes exactly where this one
//! stopped. `stats` prints a read-only summary of the cache file.
//!
//! Uses `indicatif-log-bridge` (via [`address_harvest_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

mod orchestrator;
mod stats;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Default location of the persisted cache.
const DEFAULT_CACHE_PATH: &str = "data/address_cache.json";

#[derive(Parser)]
#[command(name = "address-harvest", about = "Validated address cache builder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or resume the address cache
    Run {
        /// Re-process countries already at the target count
        #[arg(long)]
        force: bool,

        /// Cache file path
        #[arg(long, default_value = DEFAULT_CACHE_PATH)]
        cache: PathBuf,

        /// Accepted addresses per country (overrides `TARGET_PER_COUNTRY`)
        #[arg(long)]
        target: Option<usize>,

        /// Acceptance threshold (overrides `ACCEPT_THRESHOLD`)
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Print a summary of the cache
    Stats {
        /// Cache file path
        #[arg(long, default_value = DEFAULT_CACHE_PATH)]
        cache: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = address_harvest_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            force,
            cache,
            target,
            threshold,
        } => orchestrator::run_command(&multi, force, &cache, target, threshold).await?,
        Commands::Stats { cache } => stats::run(&cache)?,
    }

    Ok(())
}
