//! Upstream HTTP transport with bounded retry and exponential backoff.

use crate::error::{Failure, FailureKind, SnapshotError, UpstreamError};
use crate::types::UpstreamConfig;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, warn};

/// Upper bound on attempts for one logical operation.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry; doubled before each later one.
pub const BASE_DELAY: Duration = Duration::from_secs(1);

/// Longest response body excerpt kept in a [`Failure`].
const DETAIL_LIMIT: usize = 200;

/// Retry policy for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delays slept between attempts. Yields `max_attempts - 1` values.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.base_delay,
            remaining: self.max_attempts.saturating_sub(1),
        }
    }

    /// Whether a failure may be followed by another attempt.
    ///
    /// Only idempotent operations are ever retried; a create that timed out
    /// may already have been applied upstream.
    pub fn should_retry(&self, kind: FailureKind, idempotent: bool) -> bool {
        idempotent && kind.is_retryable()
    }
}

/// Exponential backoff schedule: `base, 2 * base, 4 * base, ...`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    remaining: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.next;
        self.next = self.next.saturating_mul(2);
        Some(delay)
    }
}

/// Runs `attempt` until it succeeds, fails permanently, or the policy runs out.
///
/// # Arguments
///
/// * `policy` - Attempt limit and backoff schedule
/// * `idempotent` - Whether the operation is safe to repeat
/// * `label` - Operation name used in log lines
/// * `attempt` - Produces one attempt per call
///
/// # Returns
///
/// The first successful value, or an [`UpstreamError`] telling exhausted
/// retries apart from a rejected request.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    idempotent: bool,
    label: &str,
    mut attempt: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, Failure>> + Send,
{
    let policy = *policy;
    let attempts = AtomicU32::new(0);
    let max_attempts = policy.max_attempts.max(1);

    let outcome = Retry::spawn(policy.backoff(), || {
        let n = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let fut = attempt();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(failure) if policy.should_retry(failure.kind, idempotent) => {
                    if n < max_attempts {
                        warn!(
                            "Retrying {} ({}, attempt {}/{})",
                            label, failure.kind, n, max_attempts
                        );
                    }
                    RetryError::to_transient(failure)
                }
                Err(failure) => RetryError::to_permanent(failure),
            }
        }
    })
    .await;

    outcome.map_err(|failure| {
        let attempts = attempts.load(Ordering::Relaxed);
        if policy.should_retry(failure.kind, idempotent) {
            UpstreamError::Exhausted {
                attempts,
                last: failure,
            }
        } else {
            UpstreamError::Rejected { attempts, failure }
        }
    })
}

/// Client for the upstream inventory API.
///
/// Holds a pooled `reqwest::Client` with authentication headers baked in;
/// each call is one logical operation with its own retry budget.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
    base_url: Url,
    policy: RetryPolicy,
}

impl Transport {
    /// Builds a transport from configuration.
    ///
    /// Fails if the base URL does not parse or the credentials are not valid
    /// header values.
    pub fn new(config: &UpstreamConfig) -> Result<Self, SnapshotError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("api-auth-accountid"),
            header_value(&config.account_id, "account id")?,
        );
        let mut key = header_value(&config.application_key, "application key")?;
        key.set_sensitive(true);
        headers.insert(HeaderName::from_static("api-auth-applicationkey"), key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            SnapshotError::Config(format!("invalid base URL '{}': {}", config.base_url, e))
        })?;

        Ok(Self {
            http,
            base_url,
            policy: config.retry,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Executes one upstream operation, retrying transient failures.
    ///
    /// Only GET and HEAD are retried; every other method gets a single attempt.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Response, UpstreamError> {
        let idempotent = matches!(method, Method::GET | Method::HEAD);
        let label = format!("{} {}", method, path);
        retry(&self.policy, idempotent, &label, || {
            self.send_once(&method, path, params, body)
        })
        .await
    }

    /// Convenience wrapper for a GET returning the parsed payload.
    pub async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, UpstreamError> {
        self.request(Method::GET, path, params, None)
            .await
            .map(|response| response.payload)
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Response, Failure> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| Failure::new(FailureKind::Request, format!("bad path '{}': {}", path, e)))?;

        let mut builder = self.http.request(method.clone(), url).query(params);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(classify_reqwest)?;
        let status = response.status();
        debug!(
            "HTTP {} {} status={} elapsed_ms={:.2}",
            method,
            path,
            status.as_u16(),
            started.elapsed().as_secs_f64() * 1000.0
        );

        let rate_limit_remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.map_err(classify_reqwest)?;

        if let Some(kind) = classify_status(status) {
            return Err(Failure::new(kind, excerpt(&text)));
        }

        let payload = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| Failure::new(FailureKind::Decode, format!("{}: {}", e, excerpt(&text))))?
        };

        Ok(Response {
            status: status.as_u16(),
            payload,
            rate_limit_remaining,
        })
    }
}

/// Successful upstream response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub payload: Value,
    /// Value of the `X-RateLimit-Remaining` header, when sent.
    pub rate_limit_remaining: Option<String>,
}

/// Maps a non-success status to a failure kind; `None` for success.
pub fn classify_status(status: StatusCode) -> Option<FailureKind> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Some(FailureKind::RateLimited)
    } else if status.is_server_error() {
        Some(FailureKind::Server(status.as_u16()))
    } else {
        Some(FailureKind::Client(status.as_u16()))
    }
}

fn classify_reqwest(err: reqwest::Error) -> Failure {
    let kind = if err.is_timeout() {
        FailureKind::Timeout
    } else if err.is_builder() {
        FailureKind::Request
    } else {
        FailureKind::Network
    };
    Failure::new(kind, err.to_string())
}

fn header_value(value: &str, what: &str) -> Result<HeaderValue, SnapshotError> {
    HeaderValue::from_str(value)
        .map_err(|_| SnapshotError::Config(format!("{} is not a valid header value", what)))
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= DETAIL_LIMIT {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(DETAIL_LIMIT).collect();
    cut.push_str("... [truncated]");
    cut
}
