//! The enrichment engine: fans unique fetches out across a bounded worker
//! pool, then applies results deterministically in item order.
//!
//! Scheduling and patch application both run on the caller's task, so items
//! are mutated by a single writer and the in-flight registry is fully built
//! before any job is resolved. Workers only produce [`FetchResult`] values.

use crate::Result;
use crate::catalog::ensure_bucket;
use crate::enrich::limiter::ServiceLimiter;
use crate::enrich::{DedupKey, Enricher, Failure, FetchContext, FetchResult, ServiceStats};
use core::time::Duration;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

const LOG_TARGET: &str = "    engine";

/// Knobs for one engine run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Only refetch buckets older than this many hours; `None` or <= 0 refetches everything.
    pub refresh_older_than_hours: Option<f64>,

    /// Per-request HTTP timeout.
    pub timeout: Duration,

    /// Minimum interval between requests, per service name.
    pub pacing: HashMap<&'static str, Duration>,

    /// Maximum concurrently running fetch jobs.
    pub workers: usize,

    /// Timestamp stamped into every `fetchedAt` field this run.
    pub run_fetched_at: String,

    /// Log cumulative per-service counters every N items; `None` disables.
    pub progress_every: Option<usize>,
}

/// Aggregated outcome of one engine run, keyed by service name.
#[derive(Debug, Default)]
pub struct EngineRunResult {
    pub stats: BTreeMap<&'static str, ServiceStats>,
    pub failures: BTreeMap<&'static str, Vec<Failure>>,
}

/// One scheduled fetch job. The handle is taken on first resolution; the
/// cached result serves every later reference.
struct Job {
    service: &'static str,
    key: DedupKey,
    handle: Option<JoinHandle<FetchResult>>,
    result: Option<FetchResult>,
    counted: bool,
}

/// Enrich `items` in place using `enrichers`, returning per-service
/// statistics and failure lists.
///
/// Individual fetch failures never abort the batch; they surface only in the
/// returned counters and failure lists.
pub async fn run_enrichment(items: &mut [serde_json::Value], enrichers: &[Arc<dyn Enricher>], opts: &EngineOptions) -> Result<EngineRunResult> {
    let mut result = EngineRunResult::default();
    for enricher in enrichers {
        let _ = result.stats.insert(enricher.name(), ServiceStats::default());
        let _ = result.failures.insert(enricher.name(), Vec::new());
    }

    // One rate limiter and one connection pool per service, shared by every
    // job for that service.
    let mut contexts: HashMap<&'static str, FetchContext> = HashMap::new();
    for enricher in enrichers {
        let interval = opts.pacing.get(enricher.name()).copied().unwrap_or(Duration::ZERO);
        let client = reqwest::Client::builder()
            .user_agent("gallery-rank")
            .pool_max_idle_per_host(opts.workers.max(1))
            .build()?;
        let ctx = FetchContext::new(Arc::new(ServiceLimiter::new(interval)), client, opts.timeout);
        let _ = contexts.insert(enricher.name(), ctx);
    }

    let semaphore = Arc::new(Semaphore::new(opts.workers.max(1)));

    // Pass 1: scan items in input order, schedule one job per unique
    // (service, key) pair, and record which jobs each item references.
    let mut jobs: Vec<Job> = Vec::new();
    let mut inflight: HashMap<(&'static str, DedupKey), usize> = HashMap::new();
    let mut item_tasks: Vec<Vec<(usize, usize)>> = vec![Vec::new(); items.len()];

    for (idx, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            continue;
        };

        for (enricher_idx, enricher) in enrichers.iter().enumerate() {
            let stats = result.stats.get_mut(enricher.name()).expect("stats entry exists");
            stats.processed += 1;

            if !enricher.needs_fetch(obj, opts.refresh_older_than_hours) {
                stats.skipped_fresh += 1;
                continue;
            }

            let Some(key) = enricher.key_for_item(obj) else {
                stats.skipped_no_key += 1;
                continue;
            };

            let inflight_key = (enricher.name(), key.clone());
            let job_id = if let Some(&job_id) = inflight.get(&inflight_key) {
                stats.cache_hits += 1;
                job_id
            } else {
                let job_id = jobs.len();
                let ctx = contexts.get(enricher.name()).expect("context exists").clone();
                jobs.push(Job {
                    service: enricher.name(),
                    key: key.clone(),
                    handle: Some(spawn_fetch(Arc::clone(enricher), key, ctx, Arc::clone(&semaphore))),
                    result: None,
                    counted: false,
                });
                let _ = inflight.insert(inflight_key, job_id);
                job_id
            };

            item_tasks[idx].push((enricher_idx, job_id));
        }
    }

    log::debug!(target: LOG_TARGET, "Scheduled {} unique fetch job(s) for {} item(s)", jobs.len(), items.len());

    // Pass 2: resolve jobs and apply patches in original item order,
    // regardless of completion order. Per-job counters are bumped exactly
    // once, on first encounter.
    for (idx, item) in items.iter_mut().enumerate() {
        let Some(obj) = item.as_object_mut() else {
            continue;
        };

        for &(enricher_idx, job_id) in &item_tasks[idx] {
            let enricher = &enrichers[enricher_idx];

            if jobs[job_id].result.is_none() {
                let handle = jobs[job_id].handle.take().expect("job is resolved only once");
                let res = match handle.await {
                    Ok(res) => res,
                    Err(e) => FetchResult::failed(format!("fetch task failed: {e}"), 0, None),
                };
                jobs[job_id].result = Some(res);
            }

            let job = &mut jobs[job_id];
            let res = job.result.clone().expect("result cached above");

            if !job.counted {
                job.counted = true;
                let stats = result.stats.get_mut(job.service).expect("stats entry exists");
                stats.requests += u64::from(res.attempts);
                if res.ok {
                    stats.ok += 1;
                } else {
                    stats.failed += 1;
                    result.failures.get_mut(job.service).expect("failures entry exists").push(Failure {
                        key: job.key.to_string(),
                        status: res.status,
                        error: res.error.clone(),
                    });
                }
            }

            let patch = match (&res.data, res.ok) {
                (Some(data), true) => enricher.patch_success(obj, data, &opts.run_fetched_at),
                _ => enricher.patch_failure(obj, res.error.as_deref()),
            };

            let bucket = ensure_bucket(obj, patch.bucket);
            for (field, value) in patch.updates {
                let _ = bucket.insert(field, value);
            }
            if patch.changed {
                result.stats.get_mut(enricher.name()).expect("stats entry exists").updated += 1;
            }
        }

        if let Some(every) = opts.progress_every
            && every > 0
            && (idx + 1).is_multiple_of(every)
        {
            for enricher in enrichers {
                let s = result.stats.get(enricher.name()).expect("stats entry exists");
                log::info!(target: LOG_TARGET,
                    "[{}] requests={} ok={} fail={} updated={} skipped_fresh={} cache_hits={} skipped_no_key={}",
                    enricher.name(), s.requests, s.ok, s.failed, s.updated, s.skipped_fresh, s.cache_hits, s.skipped_no_key);
            }
        }
    }

    Ok(result)
}

fn spawn_fetch(enricher: Arc<dyn Enricher>, key: DedupKey, ctx: FetchContext, semaphore: Arc<Semaphore>) -> JoinHandle<FetchResult> {
    tokio::spawn(async move {
        // Holding the permit for the duration of the fetch bounds the pool.
        let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
        enricher.fetch(key, &ctx).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::{FetchedData, Patch, RepoMetrics};
    use futures_util::future::BoxFuture;
    use serde_json::{Map, Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Test enricher that resolves keys from a `repo` field and, on success,
    /// writes the per-key star count into a `stub` bucket.
    struct StubEnricher {
        fetches: AtomicU64,
        fetched_keys: Mutex<Vec<String>>,
        fail_keys: Vec<String>,
        delays: HashMap<String, Duration>,
    }

    impl StubEnricher {
        fn new() -> Self {
            Self {
                fetches: AtomicU64::new(0),
                fetched_keys: Mutex::new(Vec::new()),
                fail_keys: Vec::new(),
                delays: HashMap::new(),
            }
        }

        fn failing_on(mut self, key: &str) -> Self {
            self.fail_keys.push(key.to_string());
            self
        }

        fn delayed(mut self, key: &str, delay: Duration) -> Self {
            let _ = self.delays.insert(key.to_string(), delay);
            self
        }
    }

    impl Enricher for StubEnricher {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn bucket(&self) -> &'static str {
            "stub"
        }

        fn key_for_item(&self, item: &Map<String, Value>) -> Option<DedupKey> {
            let repo = item.get("repo")?.as_str()?;
            let (owner, name) = repo.split_once('/')?;
            Some(DedupKey::Repo {
                owner: owner.to_lowercase(),
                repo: name.to_lowercase(),
            })
        }

        fn fetch<'a>(&'a self, key: DedupKey, _ctx: &'a FetchContext) -> BoxFuture<'a, FetchResult> {
            Box::pin(async move {
                let _ = self.fetches.fetch_add(1, Ordering::SeqCst);
                let key_str = key.to_string();
                self.fetched_keys.lock().unwrap().push(key_str.clone());

                if let Some(delay) = self.delays.get(&key_str) {
                    tokio::time::sleep(*delay).await;
                }

                if self.fail_keys.contains(&key_str) {
                    FetchResult::failed("HTTP 404: Not Found", 1, Some(404))
                } else {
                    FetchResult::found(
                        FetchedData::Repo(RepoMetrics {
                            stars: Some(key_str.len() as u64),
                            forks: None,
                            contributors_count: None,
                            open_issues: None,
                            pushed_at: None,
                        }),
                        1,
                        Some(200),
                    )
                }
            })
        }

        fn patch_success(&self, item: &Map<String, Value>, data: &FetchedData, fetched_at: &str) -> Patch {
            let FetchedData::Repo(repo) = data else {
                unreachable!("stub only produces repo data");
            };
            let prev_stars = crate::catalog::bucket_field(item, "stub", "stars").and_then(Value::as_u64);

            let mut updates = Map::new();
            let _ = updates.insert("stars".to_string(), json!(repo.stars));
            let _ = updates.insert("fetchedAt".to_string(), json!(fetched_at));
            let _ = updates.insert("isStale".to_string(), json!(false));

            Patch {
                bucket: "stub",
                updates,
                changed: repo.stars.is_some() && prev_stars != repo.stars,
            }
        }
    }

    fn opts() -> EngineOptions {
        EngineOptions {
            refresh_older_than_hours: Some(24.0),
            timeout: Duration::from_secs(5),
            pacing: HashMap::new(),
            workers: 4,
            run_fetched_at: "2026-02-01T00:00:00Z".to_string(),
            progress_every: None,
        }
    }

    fn item(repo: &str) -> Value {
        json!({"repo": repo})
    }

    #[tokio::test]
    async fn deduplicates_fetches_but_patches_every_item() {
        let mut items = vec![item("acme/widget"), item("acme/widget"), item("acme/other")];
        let stub = Arc::new(StubEnricher::new());
        let enrichers: Vec<Arc<dyn Enricher>> = vec![Arc::clone(&stub) as Arc<dyn Enricher>];

        let result = run_enrichment(&mut items, &enrichers, &opts()).await.unwrap();

        // Two unique keys, three items: one shared fetch, one cache hit.
        assert_eq!(stub.fetches.load(Ordering::SeqCst), 2);
        let mut fetched = stub.fetched_keys.lock().unwrap().clone();
        fetched.sort();
        assert_eq!(fetched, vec!["acme/other", "acme/widget"]);
        let stats = result.stats["stub"];
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.ok, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.updated, 3);

        for it in &items {
            assert_eq!(it["metrics"]["stub"]["isStale"], json!(false));
            assert!(it["metrics"]["stub"]["stars"].is_u64());
        }
    }

    #[tokio::test]
    async fn patch_order_is_item_order_despite_completion_order() {
        // First item's fetch completes last; its patch must still land first
        // and its job must be the first counted.
        let mut items = vec![item("acme/slowpoke"), item("acme/fast")];
        let stub = Arc::new(StubEnricher::new().delayed("acme/slowpoke", Duration::from_millis(100)));
        let enrichers: Vec<Arc<dyn Enricher>> = vec![Arc::clone(&stub) as Arc<dyn Enricher>];

        let result = run_enrichment(&mut items, &enrichers, &opts()).await.unwrap();

        assert_eq!(result.stats["stub"].ok, 2);
        assert_eq!(items[0]["metrics"]["stub"]["stars"], json!("acme/slowpoke".len() as u64));
        assert_eq!(items[1]["metrics"]["stub"]["stars"], json!("acme/fast".len() as u64));
    }

    #[tokio::test]
    async fn failure_marks_stale_and_preserves_previous_values() {
        let mut items = vec![json!({
            "repo": "acme/gone",
            "metrics": {"stub": {"stars": 17, "fetchedAt": "2020-01-01T00:00:00Z", "isStale": false}},
        })];
        let stub = Arc::new(StubEnricher::new().failing_on("acme/gone"));
        let enrichers: Vec<Arc<dyn Enricher>> = vec![Arc::clone(&stub) as Arc<dyn Enricher>];

        let result = run_enrichment(&mut items, &enrichers, &opts()).await.unwrap();

        let stats = result.stats["stub"];
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.updated, 0);

        let failures = &result.failures["stub"];
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "acme/gone");
        assert_eq!(failures[0].status, Some(404));

        // Stale flag set, last-known-good stars untouched.
        assert_eq!(items[0]["metrics"]["stub"]["isStale"], json!(true));
        assert_eq!(items[0]["metrics"]["stub"]["stars"], json!(17));
    }

    #[tokio::test]
    async fn shared_failure_is_counted_once_but_patched_everywhere() {
        let mut items = vec![item("acme/gone"), item("acme/gone")];
        let stub = Arc::new(StubEnricher::new().failing_on("acme/gone"));
        let enrichers: Vec<Arc<dyn Enricher>> = vec![Arc::clone(&stub) as Arc<dyn Enricher>];

        let result = run_enrichment(&mut items, &enrichers, &opts()).await.unwrap();

        assert_eq!(result.stats["stub"].failed, 1);
        assert_eq!(result.failures["stub"].len(), 1);
        assert_eq!(items[0]["metrics"]["stub"]["isStale"], json!(true));
        assert_eq!(items[1]["metrics"]["stub"]["isStale"], json!(true));
    }

    #[tokio::test]
    async fn fresh_items_are_skipped_entirely() {
        let recent = chrono::Utc::now().to_rfc3339();
        let mut items = vec![json!({
            "repo": "acme/widget",
            "metrics": {"stub": {"stars": 5, "fetchedAt": recent, "isStale": false}},
        })];
        let before = items.clone();

        let stub = Arc::new(StubEnricher::new());
        let enrichers: Vec<Arc<dyn Enricher>> = vec![Arc::clone(&stub) as Arc<dyn Enricher>];

        let result = run_enrichment(&mut items, &enrichers, &opts()).await.unwrap();

        assert_eq!(stub.fetches.load(Ordering::SeqCst), 0);
        let stats = result.stats["stub"];
        assert_eq!(stats.skipped_fresh, 1);
        assert_eq!(stats.requests, 0);
        assert_eq!(items, before);
    }

    #[tokio::test]
    async fn keyless_items_are_counted_separately() {
        let mut items = vec![json!({"title": "no repo"}), item("acme/widget")];
        let stub = Arc::new(StubEnricher::new());
        let enrichers: Vec<Arc<dyn Enricher>> = vec![Arc::clone(&stub) as Arc<dyn Enricher>];

        let result = run_enrichment(&mut items, &enrichers, &opts()).await.unwrap();

        let stats = result.stats["stub"];
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.skipped_no_key, 1);
        assert_eq!(stats.ok, 1);
        assert!(items[0].get("metrics").is_none());
    }

    #[tokio::test]
    async fn non_object_items_are_ignored() {
        let mut items = vec![json!(null), item("acme/widget"), json!([1, 2])];
        let stub = Arc::new(StubEnricher::new());
        let enrichers: Vec<Arc<dyn Enricher>> = vec![Arc::clone(&stub) as Arc<dyn Enricher>];

        let result = run_enrichment(&mut items, &enrichers, &opts()).await.unwrap();
        assert_eq!(result.stats["stub"].processed, 1);
    }
}
