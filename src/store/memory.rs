//! In-process reference implementation of [`VectorStore`].
//!
//! Backs the test suite and local development. Implements the same
//! observable semantics a production backend must provide: idempotent
//! upserts by point id, payload-path filters (including `[]` array
//! segments), DOT-scored dense search, sparse lexical search, RRF fusion,
//! group-by diversification, and recommend/discover on the dense vector.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{ParliamentError, Result};
use crate::sparse::SparseVector;

use super::{
    CollectionSpec, Condition, Filter, HybridQuery, MatchValue, Point, PointGroup, ScoredPoint,
    ScrollRequest, StoredRecord, VectorStore, reciprocal_rank_fusion,
};

struct StoredPoint {
    dense: Vec<f32>,
    sparse: SparseVector,
    payload: Value,
}

struct Collection {
    dense_size: usize,
    points: BTreeMap<String, StoredPoint>,
}

#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0)
    }

    pub async fn point_ids(&self, collection: &str) -> Vec<String> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.points.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn unknown_collection(name: &str) -> ParliamentError {
    ParliamentError::Store(format!("unknown collection: {name}"))
}

// ---------------------------------------------------------------------------
// Payload paths and filter evaluation
// ---------------------------------------------------------------------------

/// Resolve a payload path like `askingMember.id` or
/// `debate_parents[].Title`. Arrays fan out; every reachable leaf value is
/// returned.
fn payload_values<'a>(payload: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![payload];
    for segment in path.split('.') {
        let name = segment.strip_suffix("[]").unwrap_or(segment);
        let mut next = Vec::new();
        for value in current {
            let Some(field) = value.get(name) else {
                continue;
            };
            match field {
                Value::Array(items) => next.extend(items.iter()),
                other => next.push(other),
            }
        }
        current = next;
    }
    current
}

fn value_matches(value: &Value, expected: &MatchValue) -> bool {
    match expected {
        MatchValue::Keyword(s) => value.as_str() == Some(s.as_str()),
        MatchValue::Integer(i) => value.as_i64() == Some(*i),
    }
}

fn value_date(value: &Value) -> Option<NaiveDate> {
    let raw = value.as_str()?;
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()
}

fn condition_matches(payload: &Value, condition: &Condition) -> bool {
    match condition {
        Condition::Match { key, value } => payload_values(payload, key)
            .iter()
            .any(|v| value_matches(v, value)),
        Condition::MatchAny { key, values } => payload_values(payload, key)
            .iter()
            .any(|v| values.iter().any(|expected| value_matches(v, expected))),
        Condition::MatchText { key, text } => {
            let tokens: Vec<String> = text
                .split_whitespace()
                .map(|t| t.to_lowercase())
                .collect();
            payload_values(payload, key).iter().any(|v| {
                v.as_str().is_some_and(|field| {
                    let field = field.to_lowercase();
                    tokens.iter().all(|t| field.contains(t.as_str()))
                })
            })
        }
        Condition::DateRange { key, gte, lte } => {
            payload_values(payload, key).iter().any(|v| {
                let Some(date) = value_date(v) else {
                    return false;
                };
                gte.is_none_or(|bound| date >= bound) && lte.is_none_or(|bound| date <= bound)
            })
        }
    }
}

fn filter_matches(payload: &Value, filter: Option<&Filter>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    filter.must.iter().all(|c| condition_matches(payload, c))
        && !filter.must_not.iter().any(|c| condition_matches(payload, c))
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

impl Collection {
    fn matching<'a>(&'a self, filter: Option<&Filter>) -> Vec<(&'a String, &'a StoredPoint)> {
        self.points
            .iter()
            .filter(|(_, p)| filter_matches(&p.payload, filter))
            .collect()
    }

    /// Fused dense+sparse ranking over the filtered points, best first.
    fn fused_ranking(&self, query: &HybridQuery) -> Vec<(String, f32)> {
        let candidates = self.matching(query.filter.as_ref());

        let mut dense_ranked: Vec<(&String, f32)> = candidates
            .iter()
            .map(|(id, p)| (*id, dot(&query.dense, &p.dense)))
            .collect();
        dense_ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        let mut sparse_ranked: Vec<(&String, f32)> = candidates
            .iter()
            .map(|(id, p)| (*id, query.sparse.dot(&p.sparse)))
            .collect();
        sparse_ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        let dense_ids: Vec<String> = dense_ranked
            .into_iter()
            .take(query.limit)
            .map(|(id, _)| id.clone())
            .collect();
        let sparse_ids: Vec<String> = sparse_ranked
            .into_iter()
            .take(query.limit)
            .filter(|(_, score)| *score > 0.0)
            .map(|(id, _)| id.clone())
            .collect();

        let mut fused = reciprocal_rank_fusion(&[dense_ids, sparse_ids]);
        if let Some(min_score) = query.min_score {
            fused.retain(|(_, score)| *score >= min_score);
        }
        fused
    }

    fn scored_point(&self, id: &str, score: f32) -> Option<ScoredPoint> {
        self.points.get(id).map(|p| ScoredPoint {
            id: id.to_string(),
            score,
            payload: p.payload.clone(),
        })
    }
}

/// Assign ranked hits to groups by payload key, best groups first.
fn group_ranked(
    collection: &Collection,
    ranked: impl Iterator<Item = (String, f32)>,
    group_by: &str,
    group_size: usize,
    limit: usize,
) -> Vec<PointGroup> {
    let mut order: Vec<Value> = Vec::new();
    let mut groups: HashMap<String, PointGroup> = HashMap::new();

    for (id, score) in ranked {
        let Some(point) = collection.points.get(&id) else {
            continue;
        };
        let Some(key_value) = payload_values(&point.payload, group_by).first().copied() else {
            continue;
        };
        let key = key_value.to_string();

        if !groups.contains_key(&key) {
            if groups.len() >= limit {
                continue;
            }
            order.push(key_value.clone());
            groups.insert(
                key.clone(),
                PointGroup {
                    key: key_value.clone(),
                    hits: Vec::new(),
                },
            );
        }
        let group = groups.get_mut(&key).expect("group just ensured");
        if group.hits.len() < group_size {
            group.hits.push(ScoredPoint {
                id,
                score,
                payload: point.payload.clone(),
            });
        }
    }

    order
        .into_iter()
        .filter_map(|key_value| groups.remove(&key_value.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// VectorStore implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.entry(spec.name.clone()).or_insert(Collection {
            dense_size: spec.dense_size,
            points: BTreeMap::new(),
        });
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| unknown_collection(collection))?;
        for point in points {
            if point.dense.len() != target.dense_size {
                return Err(ParliamentError::Store(format!(
                    "dense vector size {} does not match collection size {}",
                    point.dense.len(),
                    target.dense_size
                )));
            }
            target.points.insert(
                point.id,
                StoredPoint {
                    dense: point.dense,
                    sparse: point.sparse,
                    payload: point.payload,
                },
            );
        }
        Ok(())
    }

    async fn query_hybrid(
        &self,
        collection: &str,
        query: HybridQuery,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| unknown_collection(collection))?;
        Ok(target
            .fused_ranking(&query)
            .into_iter()
            .take(query.limit)
            .filter_map(|(id, score)| target.scored_point(&id, score))
            .collect())
    }

    async fn query_hybrid_groups(
        &self,
        collection: &str,
        query: HybridQuery,
        group_by: &str,
        group_size: usize,
    ) -> Result<Vec<PointGroup>> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| unknown_collection(collection))?;
        let limit = query.limit;
        let ranked = target.fused_ranking(&query);
        Ok(group_ranked(
            target,
            ranked.into_iter(),
            group_by,
            group_size,
            limit,
        ))
    }

    async fn scroll(
        &self,
        collection: &str,
        request: ScrollRequest,
    ) -> Result<Vec<StoredRecord>> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| unknown_collection(collection))?;

        let mut matching = target.matching(request.filter.as_ref());
        if let Some(order_by) = &request.order_by {
            matching.sort_by(|(a_id, a), (b_id, b)| {
                let a_key = payload_values(&a.payload, &order_by.key)
                    .first()
                    .copied()
                    .cloned();
                let b_key = payload_values(&b.payload, &order_by.key)
                    .first()
                    .copied()
                    .cloned();
                let ordering = compare_json(a_key.as_ref(), b_key.as_ref());
                let ordering = if order_by.descending {
                    ordering.reverse()
                } else {
                    ordering
                };
                ordering.then_with(|| a_id.cmp(b_id))
            });
        }

        Ok(matching
            .into_iter()
            .take(request.limit)
            .map(|(id, p)| StoredRecord {
                id: id.clone(),
                payload: p.payload.clone(),
            })
            .collect())
    }

    async fn scroll_groups(
        &self,
        collection: &str,
        filter: Option<Filter>,
        group_by: &str,
        group_size: usize,
        limit: usize,
    ) -> Result<Vec<PointGroup>> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| unknown_collection(collection))?;
        let ranked = target
            .matching(filter.as_ref())
            .into_iter()
            .map(|(id, _)| (id.clone(), 0.0));
        Ok(group_ranked(target, ranked, group_by, group_size, limit))
    }

    async fn recommend(
        &self,
        collection: &str,
        positive: &[String],
        negative: &[String],
        filter: Option<Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| unknown_collection(collection))?;
        if positive.is_empty() {
            return Err(ParliamentError::Store(
                "recommend requires at least one positive point id".into(),
            ));
        }

        let query = example_vector(target, positive, negative)?;
        let mut hits: Vec<ScoredPoint> = target
            .matching(filter.as_ref())
            .into_iter()
            .filter(|(id, _)| !positive.contains(*id) && !negative.contains(*id))
            .map(|(id, p)| ScoredPoint {
                id: id.clone(),
                score: dot(&query, &p.dense),
                payload: p.payload.clone(),
            })
            .collect();
        sort_scored(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn discover(
        &self,
        collection: &str,
        target_id: &str,
        context: &[(String, String)],
        filter: Option<Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| unknown_collection(collection))?;
        let target_dense = target
            .points
            .get(target_id)
            .map(|p| p.dense.clone())
            .ok_or_else(|| ParliamentError::Store(format!("unknown point id: {target_id}")))?;

        let context_vectors: Vec<(Vec<f32>, Vec<f32>)> = context
            .iter()
            .map(|(pos, neg)| {
                let pos_dense = target
                    .points
                    .get(pos)
                    .map(|p| p.dense.clone())
                    .ok_or_else(|| ParliamentError::Store(format!("unknown point id: {pos}")))?;
                let neg_dense = target
                    .points
                    .get(neg)
                    .map(|p| p.dense.clone())
                    .ok_or_else(|| ParliamentError::Store(format!("unknown point id: {neg}")))?;
                Ok((pos_dense, neg_dense))
            })
            .collect::<Result<_>>()?;

        let excluded: Vec<&str> = std::iter::once(target_id)
            .chain(context.iter().flat_map(|(p, n)| [p.as_str(), n.as_str()]))
            .collect();

        // Rank primarily by how many context pairs a candidate satisfies
        // (closer to the positive than the negative), then by similarity
        // to the target.
        let mut ranked: Vec<(usize, f32, ScoredPoint)> = target
            .matching(filter.as_ref())
            .into_iter()
            .filter(|(id, _)| !excluded.contains(&id.as_str()))
            .map(|(id, p)| {
                let satisfied = context_vectors
                    .iter()
                    .filter(|(pos, neg)| dot(&p.dense, pos) > dot(&p.dense, neg))
                    .count();
                let similarity = dot(&p.dense, &target_dense);
                (
                    satisfied,
                    similarity,
                    ScoredPoint {
                        id: id.clone(),
                        score: similarity,
                        payload: p.payload.clone(),
                    },
                )
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.2.id.cmp(&b.2.id))
        });

        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(_, _, hit)| hit)
            .collect())
    }
}

fn example_vector(
    collection: &Collection,
    positive: &[String],
    negative: &[String],
) -> Result<Vec<f32>> {
    let mean = |ids: &[String]| -> Result<Option<Vec<f32>>> {
        if ids.is_empty() {
            return Ok(None);
        }
        let mut sum = vec![0.0f32; collection.dense_size];
        for id in ids {
            let point = collection
                .points
                .get(id)
                .ok_or_else(|| ParliamentError::Store(format!("unknown point id: {id}")))?;
            for (acc, v) in sum.iter_mut().zip(point.dense.iter()) {
                *acc += v;
            }
        }
        for v in &mut sum {
            *v /= ids.len() as f32;
        }
        Ok(Some(sum))
    };

    let positive_mean = mean(positive)?.unwrap_or_else(|| vec![0.0; collection.dense_size]);
    let negative_mean = mean(negative)?;

    Ok(match negative_mean {
        Some(neg) => positive_mean
            .iter()
            .zip(neg.iter())
            .map(|(p, n)| p - n)
            .collect(),
        None => positive_mean,
    })
}

fn sort_scored(hits: &mut [ScoredPoint]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn compare_json(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater, // missing keys sort last
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::SparseEncoder;
    use crate::store::OrderBy;

    fn point(id: &str, dense: Vec<f32>, text: &str, payload: Value) -> Point {
        Point {
            id: id.to_string(),
            dense,
            sparse: SparseEncoder::new().encode(text),
            payload,
        }
    }

    async fn store_with(points: Vec<Point>) -> MemoryVectorStore {
        let store = MemoryVectorStore::new();
        let spec = CollectionSpec::hansard_contributions("test", 2);
        store.ensure_collection(&spec).await.unwrap();
        store.upsert("test", points).await.unwrap();
        store
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let store = store_with(vec![point(
            "a",
            vec![1.0, 0.0],
            "first",
            serde_json::json!({"v": 1}),
        )])
        .await;
        store
            .upsert(
                "test",
                vec![point("a", vec![0.0, 1.0], "second", serde_json::json!({"v": 2}))],
            )
            .await
            .unwrap();
        assert_eq!(store.point_count("test").await, 1);
    }

    #[tokio::test]
    async fn upsert_validates_dimensions() {
        let store = store_with(vec![]).await;
        let err = store
            .upsert(
                "test",
                vec![point("a", vec![1.0, 0.0, 0.0], "x", serde_json::json!({}))],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ParliamentError::Store(_)));
    }

    #[tokio::test]
    async fn nested_and_array_paths_filter() {
        let payload = serde_json::json!({
            "House": "Commons",
            "MemberId": 7,
            "askingMember": {"id": 42},
            "debate_parents": [
                {"Title": "Energy Policy", "ExternalId": "E-1"},
                {"Title": "Grid Upgrades", "ExternalId": "E-2"}
            ]
        });
        let store = store_with(vec![point("a", vec![1.0, 0.0], "x", payload)]).await;

        let hits = store
            .scroll(
                "test",
                ScrollRequest {
                    filter: Some(Filter::must(vec![
                        Condition::Match {
                            key: "debate_parents[].ExternalId".into(),
                            value: "E-2".into(),
                        },
                        Condition::MatchText {
                            key: "debate_parents[].Title".into(),
                            text: "energy".into(),
                        },
                        Condition::Match {
                            key: "askingMember.id".into(),
                            value: 42i64.into(),
                        },
                    ])),
                    limit: 10,
                    order_by: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn date_range_is_day_inclusive() {
        let store = store_with(vec![
            point(
                "a",
                vec![1.0, 0.0],
                "x",
                serde_json::json!({"SittingDate": "2024-07-18T00:00:00Z"}),
            ),
            point(
                "b",
                vec![1.0, 0.0],
                "x",
                serde_json::json!({"SittingDate": "2024-07-19T10:30:00Z"}),
            ),
        ])
        .await;

        let day = NaiveDate::from_ymd_opt(2024, 7, 18).unwrap();
        let hits = store
            .scroll(
                "test",
                ScrollRequest {
                    filter: Some(Filter::must(vec![Condition::DateRange {
                        key: "SittingDate".into(),
                        gte: Some(day),
                        lte: Some(day),
                    }])),
                    limit: 10,
                    order_by: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn scroll_orders_descending() {
        let store = store_with(vec![
            point(
                "a",
                vec![1.0, 0.0],
                "x",
                serde_json::json!({"SittingDate": "2024-07-18T00:00:00Z"}),
            ),
            point(
                "b",
                vec![1.0, 0.0],
                "x",
                serde_json::json!({"SittingDate": "2024-07-20T00:00:00Z"}),
            ),
        ])
        .await;
        let hits = store
            .scroll(
                "test",
                ScrollRequest {
                    filter: None,
                    limit: 10,
                    order_by: Some(OrderBy::desc("SittingDate")),
                },
            )
            .await
            .unwrap();
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn hybrid_fuses_dense_and_sparse() {
        let store = store_with(vec![
            point(
                "dense-hit",
                vec![1.0, 0.0],
                "unrelated words entirely",
                serde_json::json!({}),
            ),
            point(
                "both-hit",
                vec![0.9, 0.1],
                "school funding debate",
                serde_json::json!({}),
            ),
            point(
                "neither",
                vec![0.0, 1.0],
                "railway timetable",
                serde_json::json!({}),
            ),
        ])
        .await;

        let hits = store
            .query_hybrid(
                "test",
                HybridQuery {
                    dense: vec![1.0, 0.0],
                    sparse: SparseEncoder::new().encode("school funding"),
                    filter: None,
                    limit: 3,
                    min_score: None,
                },
            )
            .await
            .unwrap();
        // Ranked in both lists beats ranked in one.
        assert_eq!(hits[0].id, "both-hit");
    }

    #[tokio::test]
    async fn groups_diversify_by_key() {
        let store = store_with(vec![
            point("a1", vec![1.0, 0.0], "x", serde_json::json!({"MemberId": 1})),
            point("a2", vec![0.95, 0.0], "x", serde_json::json!({"MemberId": 1})),
            point("a3", vec![0.9, 0.0], "x", serde_json::json!({"MemberId": 1})),
            point("b1", vec![0.8, 0.0], "x", serde_json::json!({"MemberId": 2})),
        ])
        .await;

        let groups = store
            .query_hybrid_groups(
                "test",
                HybridQuery {
                    dense: vec![1.0, 0.0],
                    sparse: SparseEncoder::new().encode(""),
                    filter: None,
                    limit: 2,
                    min_score: None,
                },
                "MemberId",
                2,
            )
            .await
            .unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, serde_json::json!(1));
        assert_eq!(groups[0].hits.len(), 2, "group capped at group_size");
        assert_eq!(groups[1].key, serde_json::json!(2));
    }

    #[tokio::test]
    async fn recommend_excludes_examples_and_follows_positive() {
        let store = store_with(vec![
            point("pos", vec![1.0, 0.0], "x", serde_json::json!({})),
            point("neg", vec![0.0, 1.0], "x", serde_json::json!({})),
            point("near-pos", vec![0.9, 0.1], "x", serde_json::json!({})),
            point("near-neg", vec![0.1, 0.9], "x", serde_json::json!({})),
        ])
        .await;

        let hits = store
            .recommend("test", &["pos".to_string()], &["neg".to_string()], None, 10)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert!(!ids.contains(&"pos"));
        assert!(!ids.contains(&"neg"));
        assert_eq!(ids[0], "near-pos");
    }

    #[tokio::test]
    async fn discover_prefers_context_satisfying_points() {
        let store = store_with(vec![
            point("target", vec![0.5, 0.5], "x", serde_json::json!({})),
            point("ctx-pos", vec![1.0, 0.0], "x", serde_json::json!({})),
            point("ctx-neg", vec![0.0, 1.0], "x", serde_json::json!({})),
            point("good", vec![0.8, 0.2], "x", serde_json::json!({})),
            point("bad", vec![0.2, 0.8], "x", serde_json::json!({})),
        ])
        .await;

        let hits = store
            .discover(
                "test",
                "target",
                &[("ctx-pos".to_string(), "ctx-neg".to_string())],
                None,
                10,
            )
            .await
            .unwrap();
        assert_eq!(hits[0].id, "good");
        assert!(!hits.iter().any(|h| h.id == "target"));
    }
}
