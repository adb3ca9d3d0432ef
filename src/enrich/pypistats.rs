//! Recent download counts from pypistats.org.

use crate::enrich::http::RetryPolicy;
use crate::enrich::pypi::project_for_item;
use crate::enrich::{DedupKey, DownloadCounts, Enricher, FetchContext, FetchResult, FetchedData, Patch};
use futures_util::future::BoxFuture;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value, json};

const API_BASE: &str = "https://pypistats.org/api/packages";

/// Enricher for the `pypistats` metrics bucket.
#[derive(Debug)]
pub struct PyPiStatsEnricher {
    api_base: String,
    retry: RetryPolicy,
}

impl PyPiStatsEnricher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_base: API_BASE.to_string(),
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

impl Default for PyPiStatsEnricher {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept only non-negative integers; anything else reads as absent.
fn as_count(value: Option<&Value>) -> Option<u64> {
    value?.as_u64()
}

impl Enricher for PyPiStatsEnricher {
    fn name(&self) -> &'static str {
        "pypistats"
    }

    fn bucket(&self) -> &'static str {
        "pypistats"
    }

    fn key_for_item(&self, item: &Map<String, Value>) -> Option<DedupKey> {
        project_for_item(item)
    }

    fn fetch<'a>(&'a self, key: DedupKey, ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult> {
        Box::pin(async move {
            let DedupKey::Project(project) = key else {
                return FetchResult::failed("pypistats enricher requires a project key", 0, None);
            };

            let url = format!("{}/{project}/recent", self.api_base);
            let fetch = ctx.request_json(&url, Self::headers(), &self.retry).await;
            if !fetch.ok {
                return FetchResult::failed(fetch.error.unwrap_or_else(|| "request failed".to_string()), fetch.attempts, fetch.status);
            }

            let Some(data) = fetch.data.as_ref().and_then(|d| d.get("data")).and_then(Value::as_object) else {
                return FetchResult::failed("response is missing data payload", fetch.attempts, fetch.status);
            };

            FetchResult::found(
                FetchedData::Downloads(DownloadCounts {
                    last_day: as_count(data.get("last_day")),
                    last_week: as_count(data.get("last_week")),
                    last_month: as_count(data.get("last_month")),
                }),
                fetch.attempts,
                fetch.status,
            )
        })
    }

    fn patch_success(&self, _item: &Map<String, Value>, data: &FetchedData, fetched_at: &str) -> Patch {
        let FetchedData::Downloads(downloads) = data else {
            return Patch {
                bucket: self.bucket(),
                updates: Map::new(),
                changed: false,
            };
        };

        let mut updates = Map::new();
        let _ = updates.insert("lastDay".to_string(), json!(downloads.last_day));
        let _ = updates.insert("lastWeek".to_string(), json!(downloads.last_week));
        let _ = updates.insert("lastMonth".to_string(), json!(downloads.last_month));
        let _ = updates.insert("fetchedAt".to_string(), json!(fetched_at));
        let _ = updates.insert("isStale".to_string(), json!(false));

        Patch {
            bucket: self.bucket(),
            updates,
            changed: true,
        }
    }
}
