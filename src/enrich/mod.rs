//! Concurrent catalog enrichment: pluggable per-service fetchers plus the
//! engine that schedules, deduplicates, and applies their results.

use crate::catalog::bucket_field;
use crate::enrich::freshness::should_refetch;
use crate::enrich::http::{JsonFetch, RetryPolicy, fetch_json};
use crate::enrich::limiter::ServiceLimiter;
use core::fmt::{Display, Formatter};
use core::time::Duration;
use futures_util::future::BoxFuture;
use reqwest::header::HeaderMap;
use serde_json::{Map, Value};
use std::sync::Arc;

pub mod engine;
pub mod freshness;
pub mod github;
pub mod http;
pub mod limiter;
pub mod pypi;
pub mod pypistats;

pub use engine::{EngineOptions, EngineRunResult, run_enrichment};

/// Identity of the external resource an enricher would fetch for an item.
///
/// Two items resolving to the same key under the same enricher share one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// A source-host repository, lowercased.
    Repo { owner: String, repo: String },

    /// A package-index project name.
    Project(String),
}

impl Display for DedupKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Repo { owner, repo } => write!(f, "{owner}/{repo}"),
            Self::Project(name) => write!(f, "{name}"),
        }
    }
}

/// Repository metrics fetched from the source-hosting service.
#[derive(Debug, Clone)]
pub struct RepoMetrics {
    pub stars: Option<u64>,
    pub forks: Option<u64>,
    pub contributors_count: Option<u64>,
    pub open_issues: Option<u64>,
    pub pushed_at: Option<String>,
}

/// Package metadata fetched from the package index.
#[derive(Debug, Clone)]
pub struct PackageMetadata {
    pub latest_version: Option<String>,
    pub latest_release_at: Option<String>,
}

/// Recent download counts fetched from the download-statistics service.
#[derive(Debug, Clone)]
pub struct DownloadCounts {
    pub last_day: Option<u64>,
    pub last_week: Option<u64>,
    pub last_month: Option<u64>,
}

/// Domain payload carried by a successful fetch.
#[derive(Debug, Clone)]
pub enum FetchedData {
    Repo(RepoMetrics),
    Package(PackageMetadata),
    Downloads(DownloadCounts),
}

/// Outcome of one enricher fetch, possibly spanning several HTTP calls.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub ok: bool,
    pub data: Option<FetchedData>,
    pub error: Option<String>,
    pub attempts: u32,
    pub status: Option<u16>,
}

impl FetchResult {
    #[must_use]
    pub fn failed(error: impl Into<String>, attempts: u32, status: Option<u16>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
            attempts,
            status,
        }
    }

    #[must_use]
    pub const fn found(data: FetchedData, attempts: u32, status: Option<u16>) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            attempts,
            status,
        }
    }
}

/// A deferred set of field updates to merge into one metrics bucket.
#[derive(Debug, Clone)]
pub struct Patch {
    pub bucket: &'static str,
    pub updates: Map<String, Value>,
    pub changed: bool,
}

/// One failed fetch, recorded for post-run reporting.
#[derive(Debug, Clone)]
pub struct Failure {
    pub key: String,
    pub status: Option<u16>,
    pub error: Option<String>,
}

/// Per-service counters aggregated across one engine run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceStats {
    pub processed: u64,
    pub requests: u64,
    pub ok: u64,
    pub failed: u64,
    pub updated: u64,
    pub skipped_fresh: u64,
    pub skipped_no_key: u64,
    pub cache_hits: u64,
}

/// Binds one service's rate limiter, connection pool, and timeout to a fetch call.
#[derive(Debug, Clone)]
pub struct FetchContext {
    limiter: Arc<ServiceLimiter>,
    client: reqwest::Client,
    timeout: Duration,
}

impl FetchContext {
    #[must_use]
    pub fn new(limiter: Arc<ServiceLimiter>, client: reqwest::Client, timeout: Duration) -> Self {
        Self { limiter, client, timeout }
    }

    /// Issue one rate-limited JSON GET through this service's connection pool.
    pub async fn request_json(&self, url: &str, headers: HeaderMap, retry: &RetryPolicy) -> JsonFetch {
        self.limiter.acquire().await;
        fetch_json(&self.client, url, headers, self.timeout, retry).await
    }
}

/// A pluggable strategy that knows how to fetch and merge one category of external metrics.
///
/// Implementations are stateless across items apart from their own configuration;
/// the engine supplies the per-service [`FetchContext`].
pub trait Enricher: Send + Sync {
    /// Stats key for this service.
    fn name(&self) -> &'static str;

    /// Metrics bucket that patches from this enricher land in.
    fn bucket(&self) -> &'static str;

    /// Derive the dedup key for an item, or `None` when the item cannot be enriched.
    fn key_for_item(&self, item: &Map<String, Value>) -> Option<DedupKey>;

    /// Whether the item's bucket is due for a refetch.
    fn needs_fetch(&self, item: &Map<String, Value>, refresh_older_than_hours: Option<f64>) -> bool {
        let fetched_at = bucket_field(item, self.bucket(), "fetchedAt").and_then(Value::as_str);
        let is_stale = bucket_field(item, self.bucket(), "isStale").and_then(Value::as_bool);
        should_refetch(fetched_at, is_stale, refresh_older_than_hours, chrono::Utc::now())
    }

    /// Perform the network call(s) for one dedup key.
    ///
    /// Multi-call fetches must sum attempts from all sub-calls into the returned
    /// result; any sub-call failure is terminal for the whole fetch.
    fn fetch<'a>(&'a self, key: DedupKey, ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult>;

    /// Map a successful fetch into bucket field updates.
    fn patch_success(&self, item: &Map<String, Value>, data: &FetchedData, fetched_at: &str) -> Patch;

    /// Mark the bucket stale after a failed fetch, preserving last-known-good values.
    fn patch_failure(&self, _item: &Map<String, Value>, _error: Option<&str>) -> Patch {
        let mut updates = Map::new();
        let _ = updates.insert("isStale".to_string(), Value::Bool(true));
        Patch {
            bucket: self.bucket(),
            updates,
            changed: false,
        }
    }
}
