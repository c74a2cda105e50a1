//! Rate-limited HTTP access for the parliament.uk APIs.
//!
//! Every outbound API call goes through a [`Fetch`] implementation. The
//! concrete [`HttpFetcher`] enforces a global token bucket and classifies
//! failures into the retry taxonomy; [`CachedFetcher`] adds a restart-safe
//! on-disk cache for idempotent GETs and is injected at construction time.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::error::{ParliamentError, Result};

/// Per-request hard timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Retries on connection-level errors before giving up.
const TRANSPORT_RETRIES: u32 = 3;

/// Truncation cap for error bodies carried in [`ParliamentError::Client`].
const MAX_ERROR_BODY_CHARS: usize = 500;

pub const USER_AGENT: &str = "parliament-mcp";

// ---------------------------------------------------------------------------
// Token bucket
// ---------------------------------------------------------------------------

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Process-wide token bucket. Acquisition is the only suspension point
/// before a request is issued.
pub struct RateLimiter {
    rate_per_second: f64,
    capacity: f64,
    state: tokio::sync::Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(rate_per_second: f64) -> Self {
        let capacity = rate_per_second.max(1.0);
        Self {
            rate_per_second,
            capacity,
            state: tokio::sync::Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate_per_second).min(self.capacity);
                state.last_refill = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                (1.0 - state.tokens) / self.rate_per_second
            };
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Fetch interface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ParliamentError::Validation(format!("response parse failed: {e}")))
    }
}

/// Single entrypoint for outbound API calls. Implementations return only
/// 2xx responses; non-2xx statuses surface as classified errors so callers
/// can decide retry policy.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<FetchResponse>;
}

#[async_trait]
impl<F: Fetch + ?Sized> Fetch for std::sync::Arc<F> {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<FetchResponse> {
        (**self).get(url, query).await
    }
}

// ---------------------------------------------------------------------------
// HTTP fetcher
// ---------------------------------------------------------------------------

pub struct HttpFetcher {
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl HttpFetcher {
    pub fn new(max_rate_per_second: f64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            limiter: RateLimiter::new(max_rate_per_second),
        }
    }

    async fn send_with_transport_retries(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).query(query).send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() && attempt < TRANSPORT_RETRIES => {
                    attempt += 1;
                    tracing::debug!(url, attempt, "connection error, retrying: {e}");
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    return Err(ParliamentError::Transient(format!("{url}: {e}")));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<FetchResponse> {
        self.limiter.acquire().await;

        let response = self.send_with_transport_retries(url, query).await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ParliamentError::RateLimited {
                message: format!("429 from {url}"),
                retry_after_secs,
            });
        }

        if status.is_server_error() {
            return Err(ParliamentError::Transient(format!("{status} from {url}")));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(ParliamentError::Client {
                status: status.as_u16(),
                body: truncated,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ParliamentError::Transient(format!("body read from {url}: {e}")))?;

        Ok(FetchResponse {
            status: status.as_u16(),
            body: body.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// On-disk cache decorator
// ---------------------------------------------------------------------------

/// Caches successful responses on disk, keyed by url + query. Only 2xx
/// responses are written, so upstream failures are always re-fetched.
/// Intended for idempotent lookups (the debate overview API).
pub struct CachedFetcher<F> {
    inner: F,
    dir: PathBuf,
}

impl<F: Fetch> CachedFetcher<F> {
    pub fn new(inner: F, dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { inner, dir })
    }

    fn cache_path(&self, url: &str, query: &[(&str, String)]) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        for (k, v) in query {
            hasher.update(b"&");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        self.dir.join(hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl<F: Fetch> Fetch for CachedFetcher<F> {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<FetchResponse> {
        let path = self.cache_path(url, query);
        if let Ok(body) = tokio::fs::read(&path).await {
            return Ok(FetchResponse { status: 200, body });
        }

        let response = self.inner.get(url, query).await?;
        if let Err(e) = tokio::fs::write(&path, &response.body).await {
            tracing::warn!("cache write failed for {}: {e}", path.display());
        }
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Retry combinator
// ---------------------------------------------------------------------------

pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Drive `op` until it succeeds, the classifier gives up, or `max_attempts`
/// is exhausted. The classifier sees the error and the 1-based attempt
/// number and returns the wait before the next attempt.
pub async fn retry_async<T, F, Fut, C>(max_attempts: u32, mut op: F, classify: C) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&ParliamentError, u32) -> RetryDecision,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(e);
                }
                match classify(&e, attempt) {
                    RetryDecision::GiveUp => return Err(e),
                    RetryDecision::RetryAfter(wait) => {
                        tracing::warn!(
                            attempt,
                            wait_secs = wait.as_secs_f64(),
                            "retrying after error: {e}"
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }
    }
}

/// Buffer added on top of a server-supplied retry-after hint.
pub const RATE_LIMIT_BUFFER_SECS: u64 = 5;

/// Extract a "retry after N seconds" hint from a provider error message.
pub fn parse_retry_after_secs(message: &str) -> Option<u64> {
    static HINT: OnceLock<Regex> = OnceLock::new();
    let re = HINT.get_or_init(|| {
        Regex::new(r"(?i)retry after (\d+) seconds").expect("valid retry-after regex")
    });
    re.captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Classifier for rate-limit-aware exponential backoff: honors the
/// retry-after hint (plus buffer) on rate-limit errors, otherwise backs
/// off exponentially between `min_secs` and `max_secs`. Non-retryable
/// errors give up immediately.
pub fn backoff_with_rate_limit_hint(
    min_secs: u64,
    max_secs: u64,
) -> impl Fn(&ParliamentError, u32) -> RetryDecision {
    move |err, attempt| {
        if !err.is_retryable() {
            return RetryDecision::GiveUp;
        }
        if let ParliamentError::RateLimited {
            message,
            retry_after_secs,
        } = err
        {
            let hinted = (*retry_after_secs).or_else(|| parse_retry_after_secs(message));
            if let Some(secs) = hinted {
                return RetryDecision::RetryAfter(Duration::from_secs(
                    secs + RATE_LIMIT_BUFFER_SECS,
                ));
            }
        }
        let backoff = (1u64 << (attempt - 1).min(16)).clamp(min_secs, max_secs);
        RetryDecision::RetryAfter(Duration::from_secs(backoff))
    }
}
