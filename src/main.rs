//! A pipeline that compiles, enriches, and ranks a component catalog.
//!
//! # Overview
//!
//! `gallery-rank` turns a directory of per-component submission files into a
//! single compiled catalog, enriches each entry with repository, package, and
//! download metrics from public APIs, and scores every component with a
//! recency-decayed ranking.
//!
//! # Quick Start
//!
//! Compile the catalog, enrich it, then rank it:
//!
//! ```bash
//! gallery-rank build
//! gallery-rank enrich
//! gallery-rank rank
//! ```
//!
//! # Commands
//!
//! **Compile submissions into a catalog:**
//! ```bash
//! gallery-rank build --components-dir components --out compiled/components.json
//! gallery-rank build --previous compiled/components.json  # carry metrics forward
//! gallery-rank build --skip-invalid                       # report and keep going
//! ```
//!
//! **Enrich with external metrics:**
//! ```bash
//! gallery-rank enrich
//! gallery-rank enrich --services github,pypi      # subset of services
//! gallery-rank enrich --refresh-older-than-hours 0  # force a full refetch
//! gallery-rank enrich --limit 10 --verbose          # debug a small batch
//! ```
//!
//! Enrichment paces each service independently, retries transient HTTP
//! failures with exponential backoff, and deduplicates fetches so that
//! components sharing a repository or package cost one request. A GitHub
//! token (from `GH_TOKEN` by default, see `--token-env`) raises the API
//! rate limit considerably.
//!
//! **Compute rankings:**
//! ```bash
//! gallery-rank rank --config ranking_config.json
//! ```
//!
//! The ranking config sets the recency half-life and per-signal weights:
//!
//! ```json
//! {
//!   "halfLifeDays": 90,
//!   "weights": { "stars": 1.0, "recency": 2.0, "contributors": 0.0, "downloads": 0.0 }
//! }
//! ```
//!
//! # Exit Codes
//!
//! All commands exit non-zero on fatal errors. `enrich` also exits non-zero
//! when any fetch failed, unless `--allow-failures` is given; `build` treats
//! invalid submissions as fatal unless `--skip-invalid` is given.

use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};
use gallery_rank::Result;

mod commands;

use crate::commands::{BuildArgs, EnrichArgs, LogLevel, RankArgs, build, enrich, init_logging, rank};

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "gallery-rank", version, about)]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none", global = true)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile submission files into the catalog document
    Build(BuildArgs),
    /// Fetch external metrics into the catalog
    Enrich(Box<EnrichArgs>),
    /// Compute ranking scores for catalog components
    Rank(RankArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match &cli.command {
        Command::Build(build_args) => build(build_args),
        Command::Enrich(enrich_args) => enrich(enrich_args).await,
        Command::Rank(rank_args) => rank(rank_args),
    }
}
