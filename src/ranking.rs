//! Recency-decayed ranking over enriched catalog components.
//!
//! Each component gets a `ranking` block holding the final score plus every
//! intermediate signal, so a score change can always be traced back to the
//! metric that moved it.

use crate::Result;
use crate::catalog::store::load_json;
use crate::misc::{get_nested, parse_iso8601};
use chrono::{DateTime, Utc};
use ohno::{app_err, bail};
use serde_json::{Map, Value, json};
use std::path::Path;

const LOG_TARGET: &str = "   ranking";

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Score weights and decay rate, loaded from a JSON config file.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingConfig {
    pub half_life_days: f64,
    pub w_stars: f64,
    pub w_recency: f64,
    pub w_contributors: f64,
    pub w_downloads: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            half_life_days: 90.0,
            w_stars: 1.0,
            w_recency: 2.0,
            w_contributors: 0.0,
            w_downloads: 0.0,
        }
    }
}

impl RankingConfig {
    /// Load from a JSON file of the form
    /// `{"halfLifeDays": 90, "weights": {"stars": 1, "recency": 2, ...}}`.
    /// Missing fields take their defaults; a non-positive half-life is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let obj = load_json(path)?;
        let obj = obj.as_object().ok_or_else(|| app_err!("ranking config must be a JSON object: {}", path.display()))?;

        let defaults = Self::default();
        let weights = obj.get("weights").and_then(Value::as_object);
        let weight = |name: &str, default: f64| weights.and_then(|w| w.get(name)).and_then(Value::as_f64).unwrap_or(default);

        let half_life_days = obj.get("halfLifeDays").and_then(Value::as_f64).unwrap_or(defaults.half_life_days);
        if half_life_days <= 0.0 {
            bail!("halfLifeDays must be > 0 in {}", path.display());
        }

        Ok(Self {
            half_life_days,
            w_stars: weight("stars", defaults.w_stars),
            w_recency: weight("recency", defaults.w_recency),
            w_contributors: weight("contributors", defaults.w_contributors),
            w_downloads: weight("downloads", defaults.w_downloads),
        })
    }
}

/// Age in fractional days, clamped to zero for future timestamps.
fn days_since(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (now - then).num_milliseconds() as f64 / 1000.0;
    seconds.max(0.0) / SECONDS_PER_DAY
}

fn log_score(count: u64) -> f64 {
    ((count + 1) as f64).log10()
}

fn stars(comp: &Value) -> u64 {
    get_nested(comp, &["metrics", "github", "stars"]).and_then(Value::as_u64).unwrap_or(0)
}

struct RecencyDays {
    combined: Option<f64>,
    github: Option<f64>,
    pypi: Option<f64>,
}

/// Days since the component last moved: the fresher of the last GitHub push
/// and the latest package release, when both are known.
fn recency_days(comp: &Value, now: DateTime<Utc>) -> RecencyDays {
    let github = parse_iso8601(get_nested(comp, &["metrics", "github", "lastPushAt"]).and_then(Value::as_str)).map(|dt| days_since(dt, now));
    let pypi = parse_iso8601(get_nested(comp, &["metrics", "pypi", "latestReleaseAt"]).and_then(Value::as_str)).map(|dt| days_since(dt, now));

    let combined = match (github, pypi) {
        (Some(g), Some(p)) => Some(g.min(p)),
        (g, p) => g.or(p),
    };

    RecencyDays { combined, github, pypi }
}

/// Compute one component's ranking block.
#[must_use]
pub fn compute_ranking(comp: &Map<String, Value>, cfg: &RankingConfig, now: DateTime<Utc>, computed_at: &str) -> Value {
    let comp_value = Value::Object(comp.clone());

    let stars_score = log_score(stars(&comp_value));
    let contributors_score = get_nested(&comp_value, &["metrics", "github", "contributorsCount"]).and_then(Value::as_u64).map(log_score);
    let downloads_score = get_nested(&comp_value, &["metrics", "pypistats", "lastMonth"]).and_then(Value::as_u64).map(log_score);

    let recency = recency_days(&comp_value, now);
    let recency_score = recency.combined.map(|days| (-days / cfg.half_life_days).exp());

    let mut score = cfg.w_stars * stars_score;
    if let Some(r) = recency_score {
        score += cfg.w_recency * r;
    }
    if let Some(c) = contributors_score {
        score += cfg.w_contributors * c;
    }
    if let Some(d) = downloads_score {
        score += cfg.w_downloads * d;
    }

    json!({
        "score": score,
        "signals": {
            "starsScore": stars_score,
            "recencyScore": recency_score,
            "contributorsScore": contributors_score,
            "daysSinceUpdate": recency.combined,
            "daysSinceGithubPush": recency.github,
            "daysSincePypiRelease": recency.pypi,
            "downloadsScore": downloads_score,
        },
        "computedAt": computed_at,
    })
}

/// Attach a `ranking` block to each component in a compiled catalog document,
/// in place. Returns the number of components processed.
pub fn rank_catalog(doc: &mut Value, cfg: &RankingConfig, limit: Option<usize>) -> Result<usize> {
    let components = doc
        .get_mut("components")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| app_err!("compiled catalog is missing a `components` array"))?;

    let now = Utc::now();
    let computed_at = crate::misc::utc_now_iso();

    let mut processed = 0;
    for comp in components.iter_mut() {
        if let Some(limit) = limit
            && processed >= limit
        {
            break;
        }
        processed += 1;

        let Some(obj) = comp.as_object() else {
            continue;
        };
        let ranking = compute_ranking(obj, cfg, now, &computed_at);
        let _ = comp.as_object_mut().expect("checked above").insert("ranking".to_string(), ranking);
    }

    log::debug!(target: LOG_TARGET, "Ranked {processed} component(s) with half-life {} day(s)", cfg.half_life_days);
    Ok(processed)
}
