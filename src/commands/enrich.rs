use crate::commands::common::{default_workers, resolve_github_token};
use clap::Parser;
use core::time::Duration;
use gallery_rank::Result;
use gallery_rank::catalog::store::{load_json, save_json};
use gallery_rank::enrich::github::GitHubEnricher;
use gallery_rank::enrich::pypi::PyPiEnricher;
use gallery_rank::enrich::pypistats::PyPiStatsEnricher;
use gallery_rank::enrich::{EngineOptions, Enricher, run_enrichment};
use gallery_rank::misc::utc_now_iso;
use ohno::{app_err, bail};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
pub struct EnrichArgs {
    /// Input compiled catalog path
    #[arg(long = "in", value_name = "PATH", default_value = "compiled/components.json")]
    pub input: PathBuf,

    /// Output path [default: overwrite the input]
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Which enrichment services to run
    #[arg(long, value_name = "NAMES", value_delimiter = ',', default_value = "github,pypi,pypistats")]
    pub services: Vec<String>,

    /// Environment variable holding a GitHub token
    #[arg(long, value_name = "VAR", default_value = "GH_TOKEN")]
    pub token_env: String,

    /// HTTP timeout in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 20.0)]
    pub timeout: f64,

    /// Minimum seconds between GitHub requests [default: 0.2 with a token, else 1.0]
    #[arg(long, value_name = "SECONDS")]
    pub sleep_github: Option<f64>,

    /// Minimum seconds between PyPI requests
    #[arg(long, value_name = "SECONDS", default_value_t = 0.3)]
    pub sleep_pypi: f64,

    /// Minimum seconds between pypistats requests [default: same as --sleep-pypi]
    #[arg(long, value_name = "SECONDS")]
    pub sleep_pypistats: Option<f64>,

    /// Only refetch metrics older than this many hours; 0 refetches everything
    #[arg(long, value_name = "HOURS", default_value_t = 24.0)]
    pub refresh_older_than_hours: f64,

    /// Only process the first N components
    #[arg(long, value_name = "COUNT")]
    pub limit: Option<usize>,

    /// Exit successfully even if some fetches fail
    #[arg(long)]
    pub allow_failures: bool,

    /// Maximum concurrent fetches [default: max(4, 4x CPU count)]
    #[arg(long, value_name = "COUNT")]
    pub workers: Option<usize>,

    /// Log progress every N components; 0 disables
    #[arg(long, value_name = "COUNT", default_value_t = 25)]
    pub progress_every: usize,

    /// Print every failure instead of the first 50 per service
    #[arg(long)]
    pub verbose: bool,
}

fn build_enrichers(services: &[String], token: Option<String>) -> Result<Vec<Arc<dyn Enricher>>> {
    let mut enrichers: Vec<Arc<dyn Enricher>> = Vec::new();
    for service in services {
        match service.trim().to_lowercase().as_str() {
            "" => {}
            "github" => enrichers.push(Arc::new(GitHubEnricher::new(token.clone()))),
            "pypi" => enrichers.push(Arc::new(PyPiEnricher::new())),
            "pypistats" => enrichers.push(Arc::new(PyPiStatsEnricher::new())),
            other => bail!("unknown enrichment service: {other}"),
        }
    }
    if enrichers.is_empty() {
        bail!("no enrichment services selected");
    }
    Ok(enrichers)
}

fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

pub async fn enrich(args: &EnrichArgs) -> Result<()> {
    let out = args.out.as_ref().unwrap_or(&args.input);

    let mut doc = load_json(&args.input)?;
    if !doc.is_object() {
        bail!("compiled catalog must be a JSON object: {}", args.input.display());
    }
    let components = doc
        .get_mut("components")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| app_err!("compiled catalog is missing a `components` array: {}", args.input.display()))?;

    let token = resolve_github_token(&args.token_env);
    let enrichers = build_enrichers(&args.services, token.clone())?;

    let github_sleep = args.sleep_github.unwrap_or(if token.is_some() { 0.2 } else { 1.0 });
    let mut pacing = HashMap::new();
    let _ = pacing.insert("github", seconds(github_sleep));
    let _ = pacing.insert("pypi", seconds(args.sleep_pypi));
    let _ = pacing.insert("pypistats", seconds(args.sleep_pypistats.unwrap_or(args.sleep_pypi)));

    let refresh = (args.refresh_older_than_hours > 0.0).then_some(args.refresh_older_than_hours);

    let upper = args.limit.unwrap_or(components.len()).min(components.len());
    let items = &mut components[..upper];

    // Preview how much work each service has before any request goes out.
    for enricher in &enrichers {
        let expected = items
            .iter()
            .filter_map(Value::as_object)
            .filter(|obj| enricher.needs_fetch(obj, refresh) && enricher.key_for_item(obj).is_some())
            .count();
        println!("[{}] will attempt {expected} component(s).", enricher.name());
    }

    let opts = EngineOptions {
        refresh_older_than_hours: refresh,
        timeout: seconds(args.timeout),
        pacing,
        workers: args.workers.unwrap_or_else(default_workers),
        run_fetched_at: utc_now_iso(),
        progress_every: (args.progress_every > 0).then_some(args.progress_every),
    };

    let result = run_enrichment(items, &enrichers, &opts).await?;

    save_json(out, &doc)?;
    println!("Wrote {} at {}.", out.display(), utc_now_iso());

    for enricher in &enrichers {
        let s = result.stats[enricher.name()];
        println!(
            "[{}] summary: processed={} requests={} ok={} fail={} updated={} skipped_fresh={} cache_hits={} skipped_no_key={}",
            enricher.name(),
            s.processed,
            s.requests,
            s.ok,
            s.failed,
            s.updated,
            s.skipped_fresh,
            s.cache_hits,
            s.skipped_no_key
        );
    }

    let mut any_failures = false;
    for enricher in &enrichers {
        let failures = &result.failures[enricher.name()];
        if failures.is_empty() {
            continue;
        }
        any_failures = true;

        eprintln!("WARNING: {} {} fetch failure(s):", failures.len(), enricher.name());
        let shown = if args.verbose { failures.len() } else { failures.len().min(50) };
        for failure in &failures[..shown] {
            let code = failure.status.map(|s| format!(" (status {s})")).unwrap_or_default();
            eprintln!("- {}{code}: {}", failure.key, failure.error.as_deref().unwrap_or("unknown error"));
        }
        if shown < failures.len() {
            eprintln!("... and {} more", failures.len() - shown);
        }
    }

    if any_failures && !args.allow_failures {
        bail!("enrichment finished with failures");
    }
    Ok(())
}
