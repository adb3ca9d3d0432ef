//! End-to-end enrichment tests: the engine driving real enrichers against
//! mock API servers.

use core::time::Duration;
use gallery_rank::enrich::github::GitHubEnricher;
use gallery_rank::enrich::http::RetryPolicy;
use gallery_rank::enrich::pypi::PyPiEnricher;
use gallery_rank::enrich::pypistats::PyPiStatsEnricher;
use gallery_rank::enrich::{EngineOptions, Enricher, run_enrichment};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RUN_STAMP: &str = "2026-02-01T00:00:00Z";

fn opts() -> EngineOptions {
    EngineOptions {
        refresh_older_than_hours: Some(24.0),
        timeout: Duration::from_secs(5),
        pacing: HashMap::new(),
        workers: 4,
        run_fetched_at: RUN_STAMP.to_string(),
        progress_every: None,
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(10),
        ..RetryPolicy::default()
    }
}

#[tokio::test]
async fn github_enrichment_deduplicates_and_patches() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widget"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stargazers_count": 42,
            "forks_count": 7,
            "open_issues_count": 3,
            "pushed_at": "2026-01-15T12:00:00Z",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/contributors"))
        .and(query_param("per_page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"login": "a"}])).insert_header(
            "Link",
            r#"<https://x/contributors?per_page=1&page=2>; rel="next", <https://x/contributors?per_page=1&page=5>; rel="last""#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .expect(1)
        .mount(&server)
        .await;

    // Two casings of the same repo plus one that 404s with prior metrics.
    let mut items = vec![
        json!({"gitHubUrl": "https://github.com/acme/widget"}),
        json!({"gitHubUrl": "https://github.com/Acme/Widget"}),
        json!({
            "gitHubUrl": "https://github.com/acme/gone",
            "metrics": {"github": {"stars": 17, "fetchedAt": "2020-01-01T00:00:00Z", "isStale": false}},
        }),
    ];

    let enrichers: Vec<Arc<dyn Enricher>> = vec![Arc::new(GitHubEnricher::new(None).with_api_base(&server.uri()).with_retry(fast_retry()))];
    let result = run_enrichment(&mut items, &enrichers, &opts()).await.unwrap();

    let stats = result.stats["github"];
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.cache_hits, 1);
    // Shared fetch: repo + contributors; failed fetch: repo only.
    assert_eq!(stats.requests, 3);
    assert_eq!(stats.ok, 1);
    assert_eq!(stats.failed, 1);

    for it in &items[..2] {
        let bucket = &it["metrics"]["github"];
        assert_eq!(bucket["stars"], json!(42));
        assert_eq!(bucket["forks"], json!(7));
        assert_eq!(bucket["contributorsCount"], json!(5));
        assert_eq!(bucket["openIssues"], json!(3));
        assert_eq!(bucket["lastPushAt"], json!("2026-01-15T12:00:00Z"));
        assert_eq!(bucket["fetchedAt"], json!(RUN_STAMP));
        assert_eq!(bucket["isStale"], json!(false));
    }

    // The 404 keeps last-known-good values and flips the stale flag.
    let gone = &items[2]["metrics"]["github"];
    assert_eq!(gone["stars"], json!(17));
    assert_eq!(gone["isStale"], json!(true));
    assert_eq!(gone["fetchedAt"], json!("2020-01-01T00:00:00Z"));

    let failures = &result.failures["github"];
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key, "acme/gone");
    assert_eq!(failures[0].status, Some(404));
}

#[tokio::test]
async fn pypi_enrichment_resolves_project_from_pip_link() {
    let server = MockServer::start().await;

    // The path proves the version qualifier was stripped before the call.
    Mock::given(method("GET"))
        .and(path("/pypi/acme-widget/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "info": {"version": "2.0"},
            "releases": {
                "1.0": [{"upload_time_iso_8601": "2024-01-01T00:00:00Z"}],
                "2.0": [
                    {"upload_time_iso_8601": "2025-03-01T00:00:00Z"},
                    {"upload_time_iso_8601": "2025-03-02T00:00:00Z"},
                ],
            },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut items = vec![json!({"pipLink": "pip install acme-widget==1.2.0"})];

    let base = format!("{}/pypi", server.uri());
    let enrichers: Vec<Arc<dyn Enricher>> = vec![Arc::new(PyPiEnricher::new().with_api_base(&base))];
    let result = run_enrichment(&mut items, &enrichers, &opts()).await.unwrap();

    assert_eq!(result.stats["pypi"].ok, 1);
    let bucket = &items[0]["metrics"]["pypi"];
    assert_eq!(bucket["latestVersion"], json!("2.0"));
    assert_eq!(bucket["latestReleaseAt"], json!("2025-03-02T00:00:00Z"));
    assert_eq!(bucket["isStale"], json!(false));
}

#[tokio::test]
async fn pypi_items_without_a_resolvable_project_are_skipped() {
    let server = MockServer::start().await;

    let mut items = vec![
        json!({"pipLink": "pip install git+https://github.com/acme/widget"}),
        json!({"title": "no install info"}),
    ];
    let before = items.clone();

    let enrichers: Vec<Arc<dyn Enricher>> = vec![Arc::new(PyPiEnricher::new().with_api_base(&server.uri()))];
    let result = run_enrichment(&mut items, &enrichers, &opts()).await.unwrap();

    let stats = result.stats["pypi"];
    assert_eq!(stats.skipped_no_key, 2);
    assert_eq!(stats.requests, 0);
    assert_eq!(items, before);
}

#[tokio::test]
async fn pypistats_enrichment_records_download_windows() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/packages/acme-widget/recent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"last_day": 5, "last_week": 50, "last_month": -1},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut items = vec![json!({"pypi": "acme-widget"})];

    let base = format!("{}/api/packages", server.uri());
    let enrichers: Vec<Arc<dyn Enricher>> = vec![Arc::new(PyPiStatsEnricher::new().with_api_base(&base))];
    let result = run_enrichment(&mut items, &enrichers, &opts()).await.unwrap();

    assert_eq!(result.stats["pypistats"].ok, 1);
    let bucket = &items[0]["metrics"]["pypistats"];
    assert_eq!(bucket["lastDay"], json!(5));
    assert_eq!(bucket["lastWeek"], json!(50));
    // Negative counts are rejected rather than recorded.
    assert_eq!(bucket["lastMonth"], json!(null));
    assert_eq!(bucket["fetchedAt"], json!(RUN_STAMP));
}

#[tokio::test]
async fn multiple_services_enrich_the_same_item() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widget"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stargazers_count": 9})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/contributors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pypi/acme-widget/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "info": {"version": "1.0"},
            "releases": {"1.0": [{"upload_time_iso_8601": "2026-01-01T00:00:00Z"}]},
        })))
        .mount(&server)
        .await;

    let mut items = vec![json!({
        "gitHubUrl": "https://github.com/acme/widget",
        "pipLink": "pip install acme-widget",
    })];

    let enrichers: Vec<Arc<dyn Enricher>> = vec![
        Arc::new(GitHubEnricher::new(None).with_api_base(&server.uri()).with_retry(fast_retry())),
        Arc::new(PyPiEnricher::new().with_api_base(&format!("{}/pypi", server.uri()))),
    ];
    let result = run_enrichment(&mut items, &enrichers, &opts()).await.unwrap();

    assert_eq!(result.stats["github"].ok, 1);
    assert_eq!(result.stats["pypi"].ok, 1);

    let metrics = &items[0]["metrics"];
    assert_eq!(metrics["github"]["stars"], json!(9));
    assert_eq!(metrics["github"]["contributorsCount"], json!(0));
    assert_eq!(metrics["pypi"]["latestVersion"], json!("1.0"));
}

#[tokio::test]
async fn results_survive_json_round_trip_with_sorted_keys() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widget"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stargazers_count": 1})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/contributors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"login": "a"}])))
        .mount(&server)
        .await;

    let mut items = vec![json!({"gitHubUrl": "https://github.com/acme/widget"})];
    let enrichers: Vec<Arc<dyn Enricher>> = vec![Arc::new(GitHubEnricher::new(None).with_api_base(&server.uri()).with_retry(fast_retry()))];
    let _ = run_enrichment(&mut items, &enrichers, &opts()).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("components.json");
    let doc = json!({"components": items});
    gallery_rank::catalog::store::save_json(&path, &doc).unwrap();

    let reloaded = gallery_rank::catalog::store::load_json(&path).unwrap();
    assert_eq!(reloaded, doc);
    assert_eq!(
        reloaded["components"][0]["metrics"]["github"]["contributorsCount"],
        Value::from(1)
    );
}
