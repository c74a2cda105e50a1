//! Vector store capability interface.
//!
//! The pipeline and query handler only ever see [`VectorStore`]; the
//! concrete backend is picked at wiring time. The trait covers the
//! capability surface the system depends on: idempotent point upserts,
//! filtered scroll, hybrid dense+sparse prefetch fused with reciprocal
//! rank fusion, group-by queries, and recommend/discover lookups.
//! [`memory::MemoryVectorStore`] is the in-process reference backend.

pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use crate::error::Result;
use crate::sparse::SparseVector;

pub const DENSE_VECTOR_NAME: &str = "text_dense";
pub const SPARSE_VECTOR_NAME: &str = "text_sparse";

// ---------------------------------------------------------------------------
// Collection layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Dot,
    Cosine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantization {
    None,
    /// INT8 scalar quantization kept resident in RAM.
    Int8AlwaysRam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadIndexKind {
    Datetime,
    Keyword,
    Integer,
    /// Word tokenizer, lowercased, English stopwords + snowball stemmer.
    TextEnglishSnowball,
}

#[derive(Debug, Clone)]
pub struct PayloadIndexSpec {
    pub field: String,
    pub kind: PayloadIndexKind,
}

impl PayloadIndexSpec {
    fn new(field: &str, kind: PayloadIndexKind) -> Self {
        Self {
            field: field.to_string(),
            kind,
        }
    }
}

/// Everything a backend needs to create one of our collections: a dense
/// named vector (`text_dense`) and an IDF-weighted sparse named vector
/// (`text_sparse`), plus the payload indexes queries rely on.
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub name: String,
    pub dense_size: usize,
    pub distance: Distance,
    pub quantization: Quantization,
    /// Apply the IDF modifier to the sparse vector.
    pub sparse_idf: bool,
    pub payload_indexes: Vec<PayloadIndexSpec>,
}

impl CollectionSpec {
    pub fn hansard_contributions(name: &str, dense_size: usize) -> Self {
        use PayloadIndexKind::*;
        Self {
            name: name.to_string(),
            dense_size,
            distance: Distance::Dot,
            quantization: Quantization::Int8AlwaysRam,
            sparse_idf: true,
            payload_indexes: vec![
                PayloadIndexSpec::new("SittingDate", Datetime),
                PayloadIndexSpec::new("DebateSectionExtId", Keyword),
                PayloadIndexSpec::new("MemberId", Integer),
                PayloadIndexSpec::new("House", Keyword),
                PayloadIndexSpec::new("debate_parents[].Title", TextEnglishSnowball),
                PayloadIndexSpec::new("debate_parents[].ExternalId", Keyword),
            ],
        }
    }

    pub fn parliamentary_questions(name: &str, dense_size: usize) -> Self {
        use PayloadIndexKind::*;
        Self {
            name: name.to_string(),
            dense_size,
            distance: Distance::Dot,
            quantization: Quantization::Int8AlwaysRam,
            sparse_idf: true,
            payload_indexes: vec![
                PayloadIndexSpec::new("dateTabled", Datetime),
                PayloadIndexSpec::new("dateAnswered", Datetime),
                PayloadIndexSpec::new("house", Keyword),
                PayloadIndexSpec::new("askingMember.id", Integer),
                PayloadIndexSpec::new("askingMember.party", Keyword),
                PayloadIndexSpec::new("answeringBodyName", TextEnglishSnowball),
                PayloadIndexSpec::new("id", Integer),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum MatchValue {
    Keyword(String),
    Integer(i64),
}

impl From<&str> for MatchValue {
    fn from(value: &str) -> Self {
        Self::Keyword(value.to_string())
    }
}

impl From<String> for MatchValue {
    fn from(value: String) -> Self {
        Self::Keyword(value)
    }
}

impl From<i64> for MatchValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

#[derive(Debug, Clone)]
pub enum Condition {
    /// Exact match on a keyword or integer payload field.
    Match { key: String, value: MatchValue },
    /// Match any of the given values (qdrant `MatchAny`).
    MatchAny { key: String, values: Vec<MatchValue> },
    /// Full-text match: every query token must occur in the field.
    MatchText { key: String, text: String },
    /// Day-granularity range, inclusive of both bounding days.
    DateRange {
        key: String,
        gte: Option<NaiveDate>,
        lte: Option<NaiveDate>,
    },
}

/// `must` + `must_not` predicate over point payloads.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub must: Vec<Condition>,
    pub must_not: Vec<Condition>,
}

impl Filter {
    pub fn must(conditions: Vec<Condition>) -> Self {
        Self {
            must: conditions,
            must_not: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Points and query shapes
// ---------------------------------------------------------------------------

/// A point to upsert: deterministic id, both named vectors, full payload.
#[derive(Debug, Clone)]
pub struct Point {
    pub id: String,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: String,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct PointGroup {
    /// The grouped payload value (e.g. a MemberId or DebateSectionExtId).
    pub key: Value,
    pub hits: Vec<ScoredPoint>,
}

/// Dense + sparse prefetches fused with RRF; `min_score` applies to the
/// fused score.
#[derive(Debug, Clone)]
pub struct HybridQuery {
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub filter: Option<Filter>,
    pub limit: usize,
    pub min_score: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub key: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn desc(key: &str) -> Self {
        Self {
            key: key.to_string(),
            descending: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScrollRequest {
    pub filter: Option<Filter>,
    pub limit: usize,
    pub order_by: Option<OrderBy>,
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if it does not exist. Idempotent.
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()>;

    /// Insert-or-overwrite by point id.
    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()>;

    async fn query_hybrid(&self, collection: &str, query: HybridQuery)
        -> Result<Vec<ScoredPoint>>;

    /// Hybrid query diversified by a payload key: up to `limit` groups of
    /// up to `group_size` hits, best groups first.
    async fn query_hybrid_groups(
        &self,
        collection: &str,
        query: HybridQuery,
        group_by: &str,
        group_size: usize,
    ) -> Result<Vec<PointGroup>>;

    async fn scroll(&self, collection: &str, request: ScrollRequest)
        -> Result<Vec<StoredRecord>>;

    /// Filter-only grouping (no vectors involved), e.g. regrouping chunks
    /// by document id.
    async fn scroll_groups(
        &self,
        collection: &str,
        filter: Option<Filter>,
        group_by: &str,
        group_size: usize,
        limit: usize,
    ) -> Result<Vec<PointGroup>>;

    /// Points similar to `positive` and dissimilar to `negative`, on the
    /// dense vector.
    async fn recommend(
        &self,
        collection: &str,
        positive: &[String],
        negative: &[String],
        filter: Option<Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;

    /// Discovery around a target point, constrained by (positive,
    /// negative) context pairs, on the dense vector.
    async fn discover(
        &self,
        collection: &str,
        target: &str,
        context: &[(String, String)],
        filter: Option<Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;
}

// ---------------------------------------------------------------------------
// Reciprocal rank fusion
// ---------------------------------------------------------------------------

/// Standard RRF constant.
const RRF_K: f32 = 60.0;

/// Fuse ranked id lists: each id scores the sum of `1 / (K + rank)` over
/// the lists it appears in. Returns ids with fused scores, best first.
pub fn reciprocal_rank_fusion(rankings: &[Vec<String>]) -> Vec<(String, f32)> {
    let mut scores: std::collections::HashMap<&str, f32> = std::collections::HashMap::new();
    for ranking in rankings {
        for (rank, id) in ranking.iter().enumerate() {
            *scores.entry(id.as_str()).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
        }
    }

    let mut fused: Vec<(String, f32)> = scores
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_prefers_items_ranked_in_both_lists() {
        let dense = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let sparse = vec!["c".to_string(), "a".to_string(), "d".to_string()];
        let fused = reciprocal_rank_fusion(&[dense, sparse]);

        let order: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();
        // "a" is 1st + 2nd, "c" is 3rd + 1st, both beat single-list hits.
        assert_eq!(order[0], "a");
        assert_eq!(order[1], "c");
        assert!(order.contains(&"b"));
        assert!(order.contains(&"d"));
    }

    #[test]
    fn rrf_single_list_preserves_order() {
        let only = vec!["x".to_string(), "y".to_string()];
        let fused = reciprocal_rank_fusion(&[only]);
        assert_eq!(fused[0].0, "x");
        assert!(fused[0].1 > fused[1].1);
    }
}
