//! Dense embedding access: provider interface, batching, rate limiting,
//! and rate-limit-aware retries.
//!
//! The provider itself is a capability handle constructed at startup and
//! threaded through; the pipeline never talks to an embedding API
//! directly, only through [`EmbeddingService`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{ParliamentError, Result};
use crate::fetch::{RateLimiter, backoff_with_rate_limit_hint, retry_async};

/// Texts per provider call.
const EMBED_BATCH_SIZE: usize = 100;

/// Retry policy for one provider batch: 5 attempts, exponential 4–60 s,
/// rate-limit hints honored with a buffer.
const EMBED_ATTEMPTS: u32 = 5;
const BACKOFF_MIN_SECS: u64 = 4;
const BACKOFF_MAX_SECS: u64 = 60;

/// A provider that turns a batch of texts into fixed-length dense vectors.
#[async_trait]
pub trait DenseEmbedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Service layer
// ---------------------------------------------------------------------------

/// Batched, rate-limited, retrying front for a [`DenseEmbedder`].
pub struct EmbeddingService {
    provider: Arc<dyn DenseEmbedder>,
    limiter: RateLimiter,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn DenseEmbedder>, max_rate_per_second: f64) -> Self {
        Self {
            provider,
            limiter: RateLimiter::new(max_rate_per_second),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed every text, in provider batches of 100, preserving order.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let total_batches = texts.len().div_ceil(EMBED_BATCH_SIZE);
        let mut all = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(EMBED_BATCH_SIZE).enumerate() {
            tracing::debug!(batch = i + 1, total_batches, "embedding batch");
            let vectors = retry_async(
                EMBED_ATTEMPTS,
                || async {
                    self.limiter.acquire().await;
                    self.provider.embed(batch).await
                },
                backoff_with_rate_limit_hint(BACKOFF_MIN_SECS, BACKOFF_MAX_SECS),
            )
            .await?;
            if vectors.len() != batch.len() {
                return Err(ParliamentError::Embedding(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            all.extend(vectors);
        }
        Ok(all)
    }

    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_all(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| ParliamentError::Embedding("provider returned no vector".into()))
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP provider
// ---------------------------------------------------------------------------

/// Thin adapter for any OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsItem>,
}

#[derive(Deserialize)]
struct EmbeddingsItem {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(base_url: String, api_key: String, model: String, dimensions: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dimensions,
        }
    }
}

#[async_trait]
impl DenseEmbedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "input": texts,
            "model": self.model,
            "dimensions": self.dimensions,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ParliamentError::Transient(format!("embeddings endpoint: {e}"))
                } else {
                    e.into()
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let message = response.text().await.unwrap_or_default();
            return Err(ParliamentError::RateLimited {
                message,
                retry_after_secs: None,
            });
        }
        if status.is_server_error() {
            return Err(ParliamentError::Transient(format!(
                "{status} from embeddings endpoint"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParliamentError::Client {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| ParliamentError::Embedding(format!("embeddings response parse: {e}")))?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// Deterministic provider for tests and local development
// ---------------------------------------------------------------------------

/// Hashes each text into a unit vector. Identical texts embed identically,
/// which is all the pipeline tests need.
pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let bytes = text.as_bytes();
        let mut vector = vec![0.0f32; self.dimensions];
        if bytes.is_empty() {
            return vector;
        }
        for (i, value) in vector.iter_mut().enumerate() {
            let byte = bytes[i % bytes.len()];
            *value = (byte as f32 / 255.0) * 2.0 - 1.0;
        }
        let magnitude: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }
        vector
    }
}

#[async_trait]
impl DenseEmbedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn mock_embedder_is_deterministic_and_normalized() {
        let embedder = MockEmbedder::new(16);
        let texts = vec!["housing supply".to_string(), "housing supply".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();
        assert_eq!(vectors[0], vectors[1]);
        let magnitude: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    /// Fails with a rate-limit hint once, then succeeds.
    struct FlakyEmbedder {
        calls: AtomicU32,
    }

    #[async_trait]
    impl DenseEmbedder for FlakyEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ParliamentError::RateLimited {
                    message: "please retry after 7 seconds".into(),
                    retry_after_secs: None,
                });
            }
            Ok(texts.iter().map(|_| vec![0.5, 0.5]).collect())
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_is_honored_with_buffer() {
        let provider = Arc::new(FlakyEmbedder {
            calls: AtomicU32::new(0),
        });
        let service = EmbeddingService::new(provider.clone(), 1000.0);

        let start = tokio::time::Instant::now();
        let vectors = service.embed_all(&["text".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        // 7 seconds hinted + 5 second buffer.
        assert!(start.elapsed() >= std::time::Duration::from_secs(12));
    }

    /// Always fails with a non-retryable client error.
    struct BrokenEmbedder;

    #[async_trait]
    impl DenseEmbedder for BrokenEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(ParliamentError::Client {
                status: 400,
                body: "bad input".into(),
            })
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let service = EmbeddingService::new(Arc::new(BrokenEmbedder), 1000.0);
        let err = service.embed_all(&["text".to_string()]).await.unwrap_err();
        assert!(matches!(err, ParliamentError::Client { status: 400, .. }));
    }
}
