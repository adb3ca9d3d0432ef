//! GitHub repository metrics: stars, forks, contributors, open issues, and
//! last push time.
//!
//! The contributor count comes from a second request with `per_page=1`; the
//! `Link` header's `rel="last"` page number equals the total contributor
//! count without paging through the list.

use crate::catalog::bucket_field;
use crate::catalog::repo_spec::RepoSpec;
use crate::enrich::http::RetryPolicy;
use crate::enrich::{DedupKey, Enricher, FetchContext, FetchResult, FetchedData, Patch, RepoMetrics};
use crate::misc::get_nested;
use futures_util::future::BoxFuture;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

const LOG_TARGET: &str = "    github";

const API_BASE: &str = "https://api.github.com";

static LAST_PAGE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"page=(\d+)>;\s*rel="last""#).expect("regex is valid"));

/// Enricher for the `github` metrics bucket.
#[derive(Debug)]
pub struct GitHubEnricher {
    token: Option<String>,
    api_base: String,
    retry: RetryPolicy,
}

impl GitHubEnricher {
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            api_base: API_BASE.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Point the enricher at a different API origin. Tests use this to
    /// target a local mock server.
    #[must_use]
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        let _ = headers.insert(USER_AGENT, HeaderValue::from_static("gallery-rank"));
        let _ = headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));
        if let Some(token) = &self.token
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}"))
        {
            let _ = headers.insert(AUTHORIZATION, value);
        }
        headers
    }
}

/// Read the total contributor count out of a `per_page=1` response.
///
/// With one contributor per page, the last page number in the `Link` header
/// is the count. Repos small enough to fit one page have no `Link` header at
/// all; then a non-empty body means exactly one contributor.
fn contributors_from_response(headers: Option<&HeaderMap>, body: Option<&Value>) -> u64 {
    if let Some(link) = headers
        .and_then(|h| h.get(reqwest::header::LINK))
        .and_then(|v| v.to_str().ok())
        && let Some(captures) = LAST_PAGE_REGEX.captures(link)
        && let Ok(count) = captures[1].parse::<u64>()
    {
        return count;
    }

    match body.and_then(Value::as_array) {
        Some(entries) if !entries.is_empty() => 1,
        _ => 0,
    }
}

impl Enricher for GitHubEnricher {
    fn name(&self) -> &'static str {
        "github"
    }

    fn bucket(&self) -> &'static str {
        "github"
    }

    fn key_for_item(&self, item: &Map<String, Value>) -> Option<DedupKey> {
        let url = item.get("gitHubUrl").and_then(Value::as_str)?;
        let spec = RepoSpec::parse(url).ok()?;
        Some(DedupKey::Repo {
            owner: spec.owner().to_lowercase(),
            repo: spec.repo().to_lowercase(),
        })
    }

    fn fetch<'a>(&'a self, key: DedupKey, ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult> {
        Box::pin(async move {
            let DedupKey::Repo { owner, repo } = key else {
                return FetchResult::failed("github enricher requires a repository key", 0, None);
            };

            let repo_url = format!("{}/repos/{owner}/{repo}", self.api_base);
            let repo_fetch = ctx.request_json(&repo_url, self.headers(), &self.retry).await;
            if !repo_fetch.ok {
                return FetchResult::failed(
                    repo_fetch.error.unwrap_or_else(|| "repository fetch failed".to_string()),
                    repo_fetch.attempts,
                    repo_fetch.status,
                );
            }
            let repo_data = repo_fetch.data.unwrap_or(Value::Null);

            let contributors_url = format!("{}/repos/{owner}/{repo}/contributors?per_page=1&anon=true", self.api_base);
            let contributors_fetch = ctx.request_json(&contributors_url, self.headers(), &self.retry).await;
            let attempts = repo_fetch.attempts + contributors_fetch.attempts;
            if !contributors_fetch.ok {
                return FetchResult::failed(
                    contributors_fetch.error.unwrap_or_else(|| "contributors fetch failed".to_string()),
                    attempts,
                    contributors_fetch.status,
                );
            }

            let contributors = contributors_from_response(contributors_fetch.headers.as_ref(), contributors_fetch.data.as_ref());
            log::debug!(target: LOG_TARGET, "Fetched {owner}/{repo}: {} star(s), {contributors} contributor(s)",
                repo_data.get("stargazers_count").and_then(Value::as_u64).unwrap_or(0));

            FetchResult::found(
                FetchedData::Repo(RepoMetrics {
                    stars: get_nested(&repo_data, &["stargazers_count"]).and_then(Value::as_u64),
                    forks: get_nested(&repo_data, &["forks_count"]).and_then(Value::as_u64),
                    contributors_count: Some(contributors),
                    open_issues: get_nested(&repo_data, &["open_issues_count"]).and_then(Value::as_u64),
                    pushed_at: get_nested(&repo_data, &["pushed_at"]).and_then(Value::as_str).map(str::to_string),
                }),
                attempts,
                repo_fetch.status,
            )
        })
    }

    fn patch_success(&self, item: &Map<String, Value>, data: &FetchedData, fetched_at: &str) -> Patch {
        let FetchedData::Repo(repo) = data else {
            return Patch {
                bucket: self.bucket(),
                updates: Map::new(),
                changed: false,
            };
        };

        let prev_stars = bucket_field(item, self.bucket(), "stars").and_then(Value::as_u64);

        // Fields absent from the payload are omitted, keeping whatever
        // last-known-good values the bucket already holds.
        let mut updates = Map::new();
        if let Some(stars) = repo.stars {
            let _ = updates.insert("stars".to_string(), json!(stars));
        }
        if let Some(forks) = repo.forks {
            let _ = updates.insert("forks".to_string(), json!(forks));
        }
        if let Some(contributors) = repo.contributors_count {
            let _ = updates.insert("contributorsCount".to_string(), json!(contributors));
        }
        if let Some(open_issues) = repo.open_issues {
            let _ = updates.insert("openIssues".to_string(), json!(open_issues));
        }
        if let Some(pushed_at) = &repo.pushed_at {
            let _ = updates.insert("lastPushAt".to_string(), json!(pushed_at));
        }
        let _ = updates.insert("fetchedAt".to_string(), json!(fetched_at));
        let _ = updates.insert("isStale".to_string(), json!(false));

        Patch {
            bucket: self.bucket(),
            updates,
            changed: repo.stars.is_some() && prev_stars != repo.stars,
        }
    }
}
