//! Resilient JSON GET: one described fetch, executed durably.
//!
//! This module decides neither *whether* nor *what* to fetch; enrichers do.
//! It only runs a single GET with bounded retry, exponential backoff, and
//! `Retry-After` handling, and classifies the outcome.

use core::time::Duration;
use rand::Rng;
use reqwest::header::HeaderMap;

const LOG_TARGET: &str = "      http";

/// Characters of response body preserved in terminal error messages.
const ERROR_BODY_LIMIT: usize = 5000;

/// Upper bound on the random jitter added to every backoff wait.
const JITTER_MAX: Duration = Duration::from_millis(250);

/// Retry policy for one fetch: attempt budget, backoff shape, and which
/// HTTP statuses are worth retrying.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(60),
            retry_statuses: vec![403, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// Policy with a different retryable status set, keeping default pacing.
    #[must_use]
    pub fn with_retry_statuses(statuses: &[u16]) -> Self {
        Self {
            retry_statuses: statuses.to_vec(),
            ..Self::default()
        }
    }
}

/// Outcome of one resilient JSON GET.
#[derive(Debug, Clone)]
pub struct JsonFetch {
    pub ok: bool,
    pub status: Option<u16>,
    pub data: Option<serde_json::Value>,
    pub headers: Option<HeaderMap>,
    pub error: Option<String>,
    pub attempts: u32,
    pub last_retry_after: Option<u64>,
}

impl JsonFetch {
    fn failure(status: Option<u16>, headers: Option<HeaderMap>, error: String, attempts: u32, last_retry_after: Option<u64>) -> Self {
        Self {
            ok: false,
            status,
            data: None,
            headers,
            error: Some(error),
            attempts,
            last_retry_after,
        }
    }
}

/// Parse the `Retry-After` header value as integer seconds.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let s = headers.get(reqwest::header::RETRY_AFTER).and_then(|h| h.to_str().ok())?;
    s.trim().parse::<u64>().ok()
}

/// Wait before the next attempt: exponential backoff capped at `backoff_cap`,
/// raised to the server's `Retry-After` request when that is longer. Jitter is
/// added by the caller.
#[must_use]
pub fn backoff_delay(attempt: u32, retry: &RetryPolicy, retry_after: Option<u64>) -> Duration {
    let exp = retry.backoff_base.saturating_mul(2_u32.saturating_pow(attempt)).min(retry.backoff_cap);
    match retry_after {
        Some(secs) => exp.max(Duration::from_secs(secs)),
        None => exp,
    }
}

fn jitter() -> Duration {
    rand::rng().random_range(Duration::ZERO..JITTER_MAX)
}

/// Truncate on a character boundary so error messages stay valid UTF-8.
fn truncate_body(body: &str) -> &str {
    if body.len() <= ERROR_BODY_LIMIT {
        return body;
    }
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// GET a URL and parse the body as JSON, retrying per `retry`.
///
/// Transport errors and statuses in the retryable set are retried with
/// exponential backoff plus jitter, honoring an integer `Retry-After` header.
/// A 2xx response with a malformed JSON body is a terminal failure.
pub async fn fetch_json(client: &reqwest::Client, url: &str, headers: HeaderMap, timeout: Duration, retry: &RetryPolicy) -> JsonFetch {
    let max_attempts = retry.max_attempts.max(1);
    let mut last_retry_after: Option<u64> = None;

    for attempt in 1..=max_attempts {
        let resp = match client.get(url).headers(headers.clone()).timeout(timeout).send().await {
            Ok(resp) => resp,
            Err(e) => {
                if attempt >= max_attempts {
                    return JsonFetch::failure(None, None, format!("request error: {e}"), attempt, last_retry_after);
                }
                let wait = backoff_delay(attempt, retry, None) + jitter();
                log::debug!(target: LOG_TARGET, "GET {url} failed ({e}), retrying in {}ms", wait.as_millis());
                tokio::time::sleep(wait).await;
                continue;
            }
        };

        let status = resp.status().as_u16();
        let resp_headers = resp.headers().clone();

        if resp.status().is_success() {
            let body = match resp.text().await {
                Ok(body) => body,
                Err(e) => {
                    if attempt >= max_attempts {
                        return JsonFetch::failure(
                            Some(status),
                            Some(resp_headers),
                            format!("could not read response body: {e}"),
                            attempt,
                            last_retry_after,
                        );
                    }
                    let wait = backoff_delay(attempt, retry, None) + jitter();
                    tokio::time::sleep(wait).await;
                    continue;
                }
            };

            return match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(data) => JsonFetch {
                    ok: true,
                    status: Some(status),
                    data: Some(data),
                    headers: Some(resp_headers),
                    error: None,
                    attempts: attempt,
                    last_retry_after,
                },
                // Malformed payloads never get better on retry.
                Err(e) => JsonFetch::failure(
                    Some(status),
                    Some(resp_headers),
                    format!("invalid JSON payload: {e}"),
                    attempt,
                    last_retry_after,
                ),
            };
        }

        let retry_after = parse_retry_after(&resp_headers);
        if let Some(secs) = retry_after {
            last_retry_after = Some(secs);
        }

        if retry.retry_statuses.contains(&status) && attempt < max_attempts {
            let wait = backoff_delay(attempt, retry, retry_after) + jitter();
            log::debug!(target: LOG_TARGET, "GET {url} returned {status}, retrying in {}ms", wait.as_millis());
            tokio::time::sleep(wait).await;
            continue;
        }

        let body = resp.text().await.unwrap_or_default();
        let mut msg = format!("HTTP {status}");
        if !body.is_empty() {
            msg = format!("{msg}: {}", truncate_body(&body));
        }
        if let Some(secs) = retry_after {
            msg = format!("{msg} (Retry-After={secs}s)");
        }
        return JsonFetch::failure(Some(status), Some(resp_headers), msg, attempt, last_retry_after);
    }

    unreachable!("attempt loop always returns")
}
