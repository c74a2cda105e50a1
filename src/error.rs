use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParliamentError {
    /// 5xx, timeouts, connection resets. Retryable.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// 429 or an embedding-provider rate limit. Always retried; callers
    /// honor the retry-after hint when one is present.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// 4xx other than 429. Not retried.
    #[error("client error {status}: {body}")]
    Client { status: u16, body: String },

    /// Record does not match the expected schema.
    #[error("validation error: {0}")]
    Validation(String),

    /// Upsert or query failure in the vector store. Fails the whole batch.
    #[error("vector store error: {0}")]
    Store(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    /// Missing endpoint/key at startup. Refuse to start.
    #[error("config error: {0}")]
    Config(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl ParliamentError {
    /// Whether a retry loop should attempt this error again.
    /// Client and Validation errors are deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::RateLimited { .. } | Self::Request(_)
        )
    }

    /// Server-supplied retry-after hint in seconds, if any.
    pub fn retry_after_hint(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

pub type Result<T, E = ParliamentError> = std::result::Result<T, E>;
