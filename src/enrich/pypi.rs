//! PyPI package metadata: latest version and its release timestamp.
//!
//! The project name comes from an explicit `pypi` field when present,
//! otherwise it is inferred conservatively from the compiled `pipLink`.

use crate::enrich::http::RetryPolicy;
use crate::enrich::{DedupKey, Enricher, FetchContext, FetchResult, FetchedData, PackageMetadata, Patch};
use futures_util::future::BoxFuture;
use regex::Regex;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

const API_BASE: &str = "https://pypi.org/pypi";

static PIP_INSTALL_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\s*pip3?\s+install\s+(\S+)").expect("regex is valid"));

/// Infer a PyPI project name from a `pip install ...` command line.
///
/// Deliberately conservative: URL and VCS install specs are rejected rather
/// than guessed at, and version qualifiers plus extras are stripped.
#[must_use]
pub fn infer_project_from_pip_link(pip_link: &str) -> Option<String> {
    let captures = PIP_INSTALL_REGEX.captures(pip_link)?;
    let spec = captures[1].trim().trim_matches('"').trim_matches('\'');
    if spec.is_empty() || spec.contains("://") || spec.starts_with("git+") {
        return None;
    }

    let mut base = spec;
    for sep in ["==", ">=", "<=", "~=", "["] {
        if let Some((head, _)) = base.split_once(sep) {
            base = head;
        }
    }
    let base = base.trim();
    (!base.is_empty()).then(|| base.to_string())
}

/// Latest upload time across one release's files, as an ISO 8601 string.
/// Lexicographic max is chronological max for these timestamps.
fn max_upload_time(files: &Value) -> Option<&str> {
    files
        .as_array()?
        .iter()
        .filter_map(|f| {
            f.get("upload_time_iso_8601")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .or_else(|| f.get("upload_time").and_then(Value::as_str).filter(|t| !t.is_empty()))
        })
        .max()
}

/// Enricher for the `pypi` metrics bucket.
#[derive(Debug)]
pub struct PyPiEnricher {
    api_base: String,
    retry: RetryPolicy,
}

impl PyPiEnricher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_base: API_BASE.to_string(),
            // Unlike GitHub, a 403 here is not a rate-limit signal.
            retry: RetryPolicy::with_retry_statuses(&[429, 500, 502, 503, 504]),
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let _ = headers.insert(USER_AGENT, HeaderValue::from_static("gallery-rank"));
        headers
    }
}

impl Default for PyPiEnricher {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared key derivation for the package-index and download-stats enrichers.
pub(crate) fn project_for_item(item: &Map<String, Value>) -> Option<DedupKey> {
    if let Some(project) = item.get("pypi").and_then(Value::as_str) {
        let project = project.trim();
        if !project.is_empty() {
            return Some(DedupKey::Project(project.to_string()));
        }
    }
    let pip_link = item.get("pipLink").and_then(Value::as_str)?;
    infer_project_from_pip_link(pip_link).map(DedupKey::Project)
}

impl Enricher for PyPiEnricher {
    fn name(&self) -> &'static str {
        "pypi"
    }

    fn bucket(&self) -> &'static str {
        "pypi"
    }

    fn key_for_item(&self, item: &Map<String, Value>) -> Option<DedupKey> {
        project_for_item(item)
    }

    fn fetch<'a>(&'a self, key: DedupKey, ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult> {
        Box::pin(async move {
            let DedupKey::Project(project) = key else {
                return FetchResult::failed("pypi enricher requires a project key", 0, None);
            };

            let url = format!("{}/{project}/json", self.api_base);
            let fetch = ctx.request_json(&url, Self::headers(), &self.retry).await;
            if !fetch.ok {
                return FetchResult::failed(fetch.error.unwrap_or_else(|| "request failed".to_string()), fetch.attempts, fetch.status);
            }

            let data = fetch.data.unwrap_or(Value::Null);
            let (Some(info), Some(releases)) = (data.get("info").and_then(Value::as_object), data.get("releases").and_then(Value::as_object)) else {
                return FetchResult::failed("response is missing info/releases", fetch.attempts, fetch.status);
            };

            let latest_version = info.get("version").and_then(Value::as_str).filter(|v| !v.is_empty()).map(str::to_string);

            // Prefer the latest version's own file timestamps; old projects
            // sometimes lack them, so fall back to the max across all releases.
            let mut latest_release_at = latest_version.as_deref().and_then(|v| releases.get(v)).and_then(max_upload_time);
            if latest_release_at.is_none() {
                latest_release_at = releases.values().filter_map(max_upload_time).max();
            }

            FetchResult::found(
                FetchedData::Package(PackageMetadata {
                    latest_version,
                    latest_release_at: latest_release_at.map(str::to_string),
                }),
                fetch.attempts,
                fetch.status,
            )
        })
    }

    fn patch_success(&self, _item: &Map<String, Value>, data: &FetchedData, fetched_at: &str) -> Patch {
        let FetchedData::Package(package) = data else {
            return Patch {
                bucket: self.bucket(),
                updates: Map::new(),
                changed: false,
            };
        };

        let mut updates = Map::new();
        let _ = updates.insert("latestVersion".to_string(), json!(package.latest_version));
        let _ = updates.insert("latestReleaseAt".to_string(), json!(package.latest_release_at));
        let _ = updates.insert("fetchedAt".to_string(), json!(fetched_at));
        let _ = updates.insert("isStale".to_string(), json!(false));

        Patch {
            bucket: self.bucket(),
            updates,
            changed: true,
        }
    }
}
