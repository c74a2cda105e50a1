use std::env;
use std::path::PathBuf;

use crate::error::{ParliamentError, Result};

/// Runtime configuration, resolved once at startup from environment
/// variables (a `.env` file is loaded by `main` before this runs).
#[derive(Debug, Clone)]
pub struct Settings {
    pub hansard_base_url: String,
    pub pqs_base_url: String,

    /// Single-file queue database. Created on first run.
    pub queue_db_path: PathBuf,

    /// Token-bucket rate for parliament.uk API calls.
    pub http_max_rate_per_second: f64,
    /// Token-bucket rate for embedding provider calls.
    pub embedding_max_rate_per_second: f64,

    pub embedding_dimensions: usize,
    pub sparse_text_embedding_model: String,

    pub chunk_size: usize,
    pub sentence_overlap: usize,
    pub chunk_strategy: String,

    pub hansard_collection: String,
    pub pq_collection: String,

    /// OpenAI-compatible embeddings endpoint, e.g. `https://api.openai.com/v1`.
    pub embedding_api_base_url: Option<String>,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,

    /// When set, idempotent GETs (debate overview lookups) are cached here
    /// across restarts.
    pub http_cache_dir: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Self {
        Settings {
            hansard_base_url: env_or("HANSARD_BASE_URL", "https://hansard-api.parliament.uk"),
            pqs_base_url: env_or("PQS_BASE_URL", "https://questions-statements.parliament.uk/api"),
            queue_db_path: PathBuf::from(env_or("QUEUE_DB_PATH", "loader_state.db")),
            http_max_rate_per_second: env_parsed("HTTP_MAX_RATE_PER_SECOND", 10.0),
            embedding_max_rate_per_second: env_parsed("EMBEDDING_MAX_RATE_PER_SECOND", 0.5),
            embedding_dimensions: env_parsed("EMBEDDING_DIMENSIONS", 1024),
            sparse_text_embedding_model: env_or("SPARSE_TEXT_EMBEDDING_MODEL", "Qdrant/bm25"),
            chunk_size: env_parsed("CHUNK_SIZE", 300),
            sentence_overlap: env_parsed("SENTENCE_OVERLAP", 1),
            chunk_strategy: env_or("CHUNK_STRATEGY", "sentence"),
            hansard_collection: env_or(
                "HANSARD_CONTRIBUTIONS_COLLECTION",
                "parliament_mcp_hansard_contributions",
            ),
            pq_collection: env_or(
                "PARLIAMENTARY_QUESTIONS_COLLECTION",
                "parliament_mcp_parliamentary_questions",
            ),
            embedding_api_base_url: env::var("EMBEDDING_API_BASE_URL").ok().filter(|v| !v.is_empty()),
            embedding_api_key: env::var("EMBEDDING_API_KEY")
                .ok()
                .or_else(|| env::var("OPENAI_API_KEY").ok())
                .filter(|v| !v.is_empty()),
            embedding_model: env_or("EMBEDDING_MODEL", "text-embedding-3-large"),
            http_cache_dir: env::var("HTTP_CACHE_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Commands that embed (process, serve) require a configured provider.
    /// Harvest and audit do not.
    pub fn require_embedding_provider(&self) -> Result<(String, String)> {
        let base_url = self
            .embedding_api_base_url
            .clone()
            .ok_or_else(|| ParliamentError::Config("EMBEDDING_API_BASE_URL is not set".into()))?;
        let api_key = self
            .embedding_api_key
            .clone()
            .ok_or_else(|| ParliamentError::Config("EMBEDDING_API_KEY is not set".into()))?;
        Ok((base_url, api_key))
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparseable {name}={raw:?}, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::from_env();
        assert_eq!(s.chunk_size, 300);
        assert_eq!(s.sentence_overlap, 1);
        assert_eq!(s.embedding_dimensions, 1024);
        assert_eq!(s.sparse_text_embedding_model, "Qdrant/bm25");
        assert_eq!(s.hansard_base_url, "https://hansard-api.parliament.uk");
    }
}
