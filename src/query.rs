//! Retrieval operations over the vector store: hybrid search with
//! structured filters, group diversification, debate-title accumulation,
//! contributor grouping, recommend/discover, and parliamentary question
//! reassembly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embedding::EmbeddingService;
use crate::error::{ParliamentError, Result};
use crate::sparse::SparseEncoder;
use crate::store::{
    Condition, Filter, HybridQuery, MatchValue, OrderBy, ScoredPoint, ScrollRequest, VectorStore,
};

/// A debate only counts as substantial once this many distinct
/// contributions from it have been seen.
pub const MINIMUM_DEBATE_HITS: usize = 2;

/// Page size for the debate-title accumulation scroll.
const DEBATE_SCROLL_PAGE: usize = 1000;

/// Chunks fetched per question when reassembling full text.
const QUESTION_GROUP_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum House {
    Commons,
    Lords,
}

impl House {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commons => "Commons",
            Self::Lords => "Lords",
        }
    }
}

// ---------------------------------------------------------------------------
// Filter builders
// ---------------------------------------------------------------------------

fn parse_day(raw: &str) -> Result<NaiveDate> {
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| ParliamentError::Validation(format!("invalid date: {raw}")))
}

fn date_range_filter(
    key: &str,
    date_from: Option<&str>,
    date_to: Option<&str>,
) -> Result<Option<Condition>> {
    if date_from.is_none() && date_to.is_none() {
        return Ok(None);
    }
    Ok(Some(Condition::DateRange {
        key: key.to_string(),
        gte: date_from.map(parse_day).transpose()?,
        lte: date_to.map(parse_day).transpose()?,
    }))
}

fn match_filter(key: &str, value: Option<MatchValue>) -> Option<Condition> {
    value.map(|value| Condition::Match {
        key: key.to_string(),
        value,
    })
}

fn build_filter(conditions: Vec<Option<Condition>>, must_not: Vec<Condition>) -> Option<Filter> {
    let must: Vec<Condition> = conditions.into_iter().flatten().collect();
    if must.is_empty() && must_not.is_empty() {
        return None;
    }
    Some(Filter { must, must_not })
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct HansardSearchRequest {
    /// Text to search for. Omit to browse the most recent contributions
    /// matching the filters.
    pub query: Option<String>,
    /// Only contributions by this member id
    pub member_id: Option<i64>,
    /// Start date (YYYY-MM-DD), inclusive
    pub date_from: Option<String>,
    /// End date (YYYY-MM-DD), inclusive
    pub date_to: Option<String>,
    /// Only contributions within this debate section
    pub debate_id: Option<String>,
    pub house: Option<House>,
    /// Maximum results (default 100)
    pub max_results: Option<usize>,
    /// Minimum fused relevance score (default 0)
    pub min_score: Option<f32>,
    /// Member ids to exclude
    pub exclude_member_ids: Option<Vec<i64>>,
    /// Diversify results by this payload key (e.g. "DebateSectionExtId"
    /// or "MemberId"); results come back as groups
    pub group_by: Option<String>,
    /// Hits per group when group_by is set (default 1)
    pub group_size: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DebateTitleSearchRequest {
    /// Text to match against debate titles (optional if a date bound is given)
    pub query: Option<String>,
    /// Start date (YYYY-MM-DD), inclusive
    pub date_from: Option<String>,
    /// End date (YYYY-MM-DD), inclusive
    pub date_to: Option<String>,
    pub house: Option<House>,
    /// Maximum debates to return (default 50)
    pub max_results: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ContributorsRequest {
    /// Text to search for in contributions
    pub query: String,
    /// Number of top contributors to return (default 10)
    pub num_contributors: Option<usize>,
    /// Contributions returned per contributor (default 10)
    pub num_contributions: Option<usize>,
    /// Start date (YYYY-MM-DD), inclusive
    pub date_from: Option<String>,
    /// End date (YYYY-MM-DD), inclusive
    pub date_to: Option<String>,
    pub house: Option<House>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecommendRequest {
    /// Point ids to steer towards
    pub positive_ids: Vec<String>,
    /// Point ids to steer away from
    pub negative_ids: Option<Vec<String>>,
    /// Maximum results (default 10)
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ContextPair {
    pub positive: String,
    pub negative: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DiscoverRequest {
    /// The point id to discover around
    pub target_id: String,
    /// (positive, negative) context pairs constraining the search
    pub context_pairs: Vec<ContextPair>,
    /// Maximum results (default 10)
    pub max_results: Option<usize>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct QuestionSearchRequest {
    /// Text to search for. Omit to browse the most recent questions
    /// matching the filters.
    pub query: Option<String>,
    /// Start date for when the question was tabled (YYYY-MM-DD), inclusive
    pub date_from: Option<String>,
    /// End date for when the question was tabled (YYYY-MM-DD), inclusive
    pub date_to: Option<String>,
    /// Asking member's party
    pub party: Option<String>,
    /// Asking member's id
    pub asking_member_id: Option<i64>,
    /// Answering body name (text match)
    pub answering_body_name: Option<String>,
    /// Minimum fused relevance score (default 0)
    pub min_score: Option<f32>,
    /// Maximum questions to return (default 25)
    pub max_results: Option<usize>,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ContributionHit {
    pub id: String,
    pub text: String,
    pub date: Option<String>,
    pub house: Option<String>,
    pub member_id: Option<i64>,
    pub member_name: Option<String>,
    pub relevance_score: f32,
    pub debate_title: String,
    pub debate_url: String,
    pub contribution_url: String,
    pub order_in_debate: Option<i64>,
    pub debate_parents: Value,
}

impl ContributionHit {
    fn from_payload(id: String, score: f32, payload: &Value) -> Self {
        Self {
            id,
            text: str_field(payload, "text"),
            date: opt_str_field(payload, "SittingDate"),
            house: opt_str_field(payload, "House"),
            member_id: payload.get("MemberId").and_then(|v| v.as_i64()),
            member_name: opt_str_field(payload, "MemberName"),
            relevance_score: score,
            debate_title: str_field(payload, "DebateSection"),
            debate_url: str_field(payload, "debate_url"),
            contribution_url: str_field(payload, "contribution_url"),
            order_in_debate: payload.get("OrderInDebateSection").and_then(|v| v.as_i64()),
            debate_parents: payload
                .get("debate_parents")
                .cloned()
                .unwrap_or(Value::Array(Vec::new())),
        }
    }
}

/// Flat hits for plain searches, nested groups when diversified.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ContributionResults {
    Flat(Vec<ContributionHit>),
    Grouped(Vec<Vec<ContributionHit>>),
}

#[derive(Debug, Clone, Serialize)]
pub struct DebateInfo {
    pub debate_id: String,
    pub title: String,
    pub date: Option<String>,
    pub house: Option<String>,
    pub debate_parents: Value,
    pub debate_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendHit {
    pub id: String,
    pub text: String,
    pub member_name: Option<String>,
    pub date: Option<String>,
    pub score: f32,
}

impl RecommendHit {
    fn from_point(point: &ScoredPoint) -> Self {
        Self {
            id: point.id.clone(),
            text: str_field(&point.payload, "text"),
            member_name: opt_str_field(&point.payload, "MemberName"),
            date: opt_str_field(&point.payload, "SittingDate"),
            score: point.score,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionResult {
    pub question_text: String,
    pub answer_text: String,
    #[serde(rename = "askingMember")]
    pub asking_member: Value,
    #[serde(rename = "answeringMember")]
    pub answering_member: Value,
    #[serde(rename = "dateTabled")]
    pub date_tabled: Option<String>,
    #[serde(rename = "dateAnswered")]
    pub date_answered: Option<String>,
    #[serde(rename = "answeringBodyName")]
    pub answering_body_name: Option<String>,
    pub question_url: String,
    pub created_at: Option<String>,
}

fn str_field(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn opt_str_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Date part of an ISO datetime payload value.
fn date_part(raw: &Option<String>) -> Option<String> {
    raw.as_deref().map(|s| s.get(..10).unwrap_or(s).to_string())
}

// ---------------------------------------------------------------------------
// Debate accumulation
// ---------------------------------------------------------------------------

struct DebateEntry {
    contribution_ids: HashSet<String>,
    info: DebateInfo,
}

/// Tracks contributions per debate across scroll pages and yields the
/// debates that accumulated enough distinct hits.
#[derive(Default)]
struct DebateCollection {
    debates: HashMap<String, DebateEntry>,
}

impl DebateCollection {
    /// Returns true if this contribution added new data.
    fn add_contribution(&mut self, payload: &Value) -> bool {
        let Some(debate_id) = payload.get("DebateSectionExtId").and_then(|v| v.as_str()) else {
            return false;
        };
        let contribution_key = payload
            .get("ContributionExtId")
            .map(|v| v.to_string())
            .unwrap_or_default();

        let entry = self
            .debates
            .entry(debate_id.to_string())
            .or_insert_with(|| DebateEntry {
                contribution_ids: HashSet::new(),
                info: DebateInfo {
                    debate_id: debate_id.to_string(),
                    title: str_field(payload, "DebateSection"),
                    date: opt_str_field(payload, "SittingDate"),
                    house: opt_str_field(payload, "House"),
                    debate_parents: payload
                        .get("debate_parents")
                        .cloned()
                        .unwrap_or(Value::Array(Vec::new())),
                    debate_url: str_field(payload, "debate_url"),
                },
            });
        entry.contribution_ids.insert(contribution_key)
    }

    fn substantial_ids(&self) -> Vec<String> {
        self.debates
            .iter()
            .filter(|(_, entry)| entry.contribution_ids.len() >= MINIMUM_DEBATE_HITS)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn substantial_debates(&self) -> Vec<DebateInfo> {
        let mut debates: Vec<DebateInfo> = self
            .debates
            .values()
            .filter(|entry| entry.contribution_ids.len() >= MINIMUM_DEBATE_HITS)
            .map(|entry| entry.info.clone())
            .collect();
        debates.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.debate_id.cmp(&b.debate_id)));
        debates
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

pub struct QueryHandler {
    store: Arc<dyn VectorStore>,
    embedder: Arc<EmbeddingService>,
    sparse: SparseEncoder,
    hansard_collection: String,
    pq_collection: String,
}

impl QueryHandler {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<EmbeddingService>,
        hansard_collection: String,
        pq_collection: String,
    ) -> Self {
        Self {
            store,
            embedder,
            sparse: SparseEncoder::new(),
            hansard_collection,
            pq_collection,
        }
    }

    async fn hybrid_query(
        &self,
        query: &str,
        filter: Option<Filter>,
        limit: usize,
        min_score: Option<f32>,
    ) -> Result<HybridQuery> {
        Ok(HybridQuery {
            dense: self.embedder.embed_single(query).await?,
            sparse: self.sparse.encode(query),
            filter,
            limit,
            min_score,
        })
    }

    /// Semantic + lexical search over Hansard contributions, with
    /// structured filters and optional group diversification. Without a
    /// query this browses the newest matching contributions.
    pub async fn search_hansard_contributions(
        &self,
        request: &HansardSearchRequest,
    ) -> Result<ContributionResults> {
        let max_results = request.max_results.unwrap_or(100);
        let must_not = match &request.exclude_member_ids {
            Some(ids) if !ids.is_empty() => vec![Condition::MatchAny {
                key: "MemberId".into(),
                values: ids.iter().map(|id| MatchValue::Integer(*id)).collect(),
            }],
            _ => Vec::new(),
        };
        let filter = build_filter(
            vec![
                match_filter("MemberId", request.member_id.map(MatchValue::Integer)),
                match_filter(
                    "DebateSectionExtId",
                    request.debate_id.clone().map(MatchValue::Keyword),
                ),
                match_filter(
                    "House",
                    request.house.map(|h| MatchValue::Keyword(h.as_str().into())),
                ),
                date_range_filter(
                    "SittingDate",
                    request.date_from.as_deref(),
                    request.date_to.as_deref(),
                )?,
            ],
            must_not,
        );

        let Some(query) = request.query.as_deref().filter(|q| !q.trim().is_empty()) else {
            // No query: newest first, then re-ordered chronologically the
            // way the results read in a debate.
            let records = self
                .store
                .scroll(
                    &self.hansard_collection,
                    ScrollRequest {
                        filter,
                        limit: max_results,
                        order_by: Some(OrderBy::desc("SittingDate")),
                    },
                )
                .await?;
            let mut hits: Vec<ContributionHit> = records
                .iter()
                .map(|r| ContributionHit::from_payload(r.id.clone(), 1.0, &r.payload))
                .collect();
            hits.sort_by(|a, b| {
                a.date
                    .cmp(&b.date)
                    .then_with(|| a.order_in_debate.cmp(&b.order_in_debate))
            });
            return Ok(ContributionResults::Flat(hits));
        };

        let hybrid = self
            .hybrid_query(query, filter, max_results, request.min_score)
            .await?;

        if let Some(group_by) = request.group_by.as_deref() {
            let groups = self
                .store
                .query_hybrid_groups(
                    &self.hansard_collection,
                    hybrid,
                    group_by,
                    request.group_size.unwrap_or(1),
                )
                .await?;
            return Ok(ContributionResults::Grouped(
                groups
                    .iter()
                    .map(|group| {
                        group
                            .hits
                            .iter()
                            .map(|hit| {
                                ContributionHit::from_payload(
                                    hit.id.clone(),
                                    hit.score,
                                    &hit.payload,
                                )
                            })
                            .collect()
                    })
                    .collect(),
            ));
        }

        let points = self
            .store
            .query_hybrid(&self.hansard_collection, hybrid)
            .await?;
        Ok(ContributionResults::Flat(
            points
                .iter()
                .map(|p| ContributionHit::from_payload(p.id.clone(), p.score, &p.payload))
                .collect(),
        ))
    }

    /// Accumulate debates with at least [`MINIMUM_DEBATE_HITS`] distinct
    /// contributions, scrolling newest-first and excluding debates
    /// already found substantial.
    pub async fn search_debate_titles(
        &self,
        request: &DebateTitleSearchRequest,
    ) -> Result<Vec<DebateInfo>> {
        if request.query.is_none() && request.date_from.is_none() && request.date_to.is_none() {
            return Err(ParliamentError::Validation(
                "at least one of 'query', 'date_from', or 'date_to' must be provided".into(),
            ));
        }
        let max_results = request.max_results.unwrap_or(50);

        let mut must: Vec<Condition> = Vec::new();
        if let Some(condition) = date_range_filter(
            "SittingDate",
            request.date_from.as_deref(),
            request.date_to.as_deref(),
        )? {
            must.push(condition);
        }
        if let Some(house) = request.house {
            must.push(Condition::Match {
                key: "House".into(),
                value: MatchValue::Keyword(house.as_str().into()),
            });
        }
        if let Some(query) = request.query.as_deref().filter(|q| !q.trim().is_empty()) {
            must.push(Condition::MatchText {
                key: "debate_parents[].Title".into(),
                text: query.to_string(),
            });
        }

        let mut debates = DebateCollection::default();
        loop {
            let substantial = debates.substantial_ids();
            if substantial.len() >= max_results {
                break;
            }

            let must_not = if substantial.is_empty() {
                Vec::new()
            } else {
                vec![Condition::MatchAny {
                    key: "DebateSectionExtId".into(),
                    values: substantial.into_iter().map(MatchValue::Keyword).collect(),
                }]
            };
            let contributions = self
                .store
                .scroll(
                    &self.hansard_collection,
                    ScrollRequest {
                        filter: Some(Filter {
                            must: must.clone(),
                            must_not,
                        }),
                        limit: DEBATE_SCROLL_PAGE,
                        order_by: Some(OrderBy::desc("SittingDate")),
                    },
                )
                .await?;
            if contributions.is_empty() {
                break;
            }

            let mut new_data = false;
            for record in &contributions {
                new_data |= debates.add_contribution(&record.payload);
            }
            if !new_data {
                break;
            }
        }

        let mut result = debates.substantial_debates();
        result.truncate(max_results);
        Ok(result)
    }

    /// Top contributors for a topic: hybrid search grouped by member,
    /// best members first with their most relevant contributions.
    pub async fn find_relevant_contributors(
        &self,
        request: &ContributorsRequest,
    ) -> Result<Vec<Vec<ContributionHit>>> {
        if request.query.trim().is_empty() {
            return Err(ParliamentError::Validation("a query must be provided".into()));
        }

        let filter = build_filter(
            vec![
                match_filter(
                    "House",
                    request.house.map(|h| MatchValue::Keyword(h.as_str().into())),
                ),
                date_range_filter(
                    "SittingDate",
                    request.date_from.as_deref(),
                    request.date_to.as_deref(),
                )?,
            ],
            Vec::new(),
        );

        let hybrid = self
            .hybrid_query(
                &request.query,
                filter,
                request.num_contributors.unwrap_or(10),
                Some(0.0),
            )
            .await?;
        let groups = self
            .store
            .query_hybrid_groups(
                &self.hansard_collection,
                hybrid,
                "MemberId",
                request.num_contributions.unwrap_or(10),
            )
            .await?;

        Ok(groups
            .iter()
            .map(|group| {
                group
                    .hits
                    .iter()
                    .map(|hit| ContributionHit::from_payload(hit.id.clone(), hit.score, &hit.payload))
                    .collect()
            })
            .collect())
    }

    /// Contributions similar to the positive examples and dissimilar to
    /// the negative ones.
    pub async fn recommend_contributions(
        &self,
        request: &RecommendRequest,
    ) -> Result<Vec<RecommendHit>> {
        if request.positive_ids.is_empty() {
            return Err(ParliamentError::Validation(
                "at least one positive id must be provided".into(),
            ));
        }
        let negative = request.negative_ids.clone().unwrap_or_default();
        let points = self
            .store
            .recommend(
                &self.hansard_collection,
                &request.positive_ids,
                &negative,
                None,
                request.max_results.unwrap_or(10),
            )
            .await?;
        Ok(points.iter().map(RecommendHit::from_point).collect())
    }

    /// Discovery around a target point, steered by context pairs.
    pub async fn discover_contributions(
        &self,
        request: &DiscoverRequest,
    ) -> Result<Vec<RecommendHit>> {
        let context: Vec<(String, String)> = request
            .context_pairs
            .iter()
            .map(|pair| (pair.positive.clone(), pair.negative.clone()))
            .collect();
        let points = self
            .store
            .discover(
                &self.hansard_collection,
                &request.target_id,
                &context,
                None,
                request.max_results.unwrap_or(10),
            )
            .await?;
        Ok(points.iter().map(RecommendHit::from_point).collect())
    }

    /// Search questions, then reassemble the full question/answer text
    /// from their chunks, most recently ingested first.
    pub async fn search_parliamentary_questions(
        &self,
        request: &QuestionSearchRequest,
    ) -> Result<Vec<QuestionResult>> {
        let max_results = request.max_results.unwrap_or(25);
        let mut conditions = vec![
            date_range_filter(
                "dateTabled",
                request.date_from.as_deref(),
                request.date_to.as_deref(),
            )?,
            match_filter(
                "askingMember.party",
                request.party.clone().map(MatchValue::Keyword),
            ),
            match_filter(
                "askingMember.id",
                request.asking_member_id.map(MatchValue::Integer),
            ),
        ];
        if let Some(body) = request
            .answering_body_name
            .as_deref()
            .filter(|b| !b.trim().is_empty())
        {
            conditions.push(Some(Condition::MatchText {
                key: "answeringBodyName".into(),
                text: body.to_string(),
            }));
        }
        let filter = build_filter(conditions, Vec::new());

        // Stage one: find which questions have any relevant chunk.
        let question_ids: Vec<i64> = match request.query.as_deref().filter(|q| !q.trim().is_empty())
        {
            Some(query) => {
                let hybrid = self
                    .hybrid_query(query, filter, max_results, request.min_score)
                    .await?;
                let points = self.store.query_hybrid(&self.pq_collection, hybrid).await?;
                points
                    .iter()
                    .filter_map(|p| p.payload.get("id").and_then(|v| v.as_i64()))
                    .collect()
            }
            None => {
                let records = self
                    .store
                    .scroll(
                        &self.pq_collection,
                        ScrollRequest {
                            filter,
                            limit: max_results,
                            order_by: Some(OrderBy::desc("id")),
                        },
                    )
                    .await?;
                records
                    .iter()
                    .filter_map(|r| r.payload.get("id").and_then(|v| v.as_i64()))
                    .collect()
            }
        };

        let mut seen = HashSet::new();
        let question_ids: Vec<i64> = question_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();
        if question_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Stage two: pull every chunk of those questions and reassemble.
        let groups = self
            .store
            .scroll_groups(
                &self.pq_collection,
                Some(Filter::must(vec![Condition::MatchAny {
                    key: "id".into(),
                    values: question_ids.iter().map(|id| MatchValue::Integer(*id)).collect(),
                }])),
                "id",
                QUESTION_GROUP_SIZE,
                max_results,
            )
            .await?;

        let mut results: Vec<QuestionResult> = groups
            .iter()
            .filter_map(|group| reassemble_question(&group.hits))
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }
}

/// Rebuild one question's full text from its chunks: sort by chunk index
/// within each chunk type, join with newlines, and take the freshest
/// payload for the metadata fields.
fn reassemble_question(hits: &[ScoredPoint]) -> Option<QuestionResult> {
    let mut question_chunks: Vec<(u64, &str)> = Vec::new();
    let mut answer_chunks: Vec<(u64, &str)> = Vec::new();

    for hit in hits {
        let Some(text) = hit.payload.get("text").and_then(|v| v.as_str()) else {
            continue;
        };
        let index = chunk_index(&hit.id).unwrap_or(u64::MAX);
        match hit.payload.get("chunk_type").and_then(|v| v.as_str()) {
            Some("question") => question_chunks.push((index, text)),
            Some("answer") => answer_chunks.push((index, text)),
            _ => {}
        }
    }
    question_chunks.sort_by_key(|(index, _)| *index);
    answer_chunks.sort_by_key(|(index, _)| *index);

    let payload = &hits
        .iter()
        .max_by_key(|hit| opt_str_field(&hit.payload, "created_at"))?
        .payload;

    let date_tabled = date_part(&opt_str_field(payload, "dateTabled"));
    let uin = str_field(payload, "uin");
    Some(QuestionResult {
        question_text: join_chunks(&question_chunks),
        answer_text: join_chunks(&answer_chunks),
        asking_member: payload.get("askingMember").cloned().unwrap_or(Value::Null),
        answering_member: payload
            .get("answeringMember")
            .cloned()
            .unwrap_or(Value::Null),
        question_url: format!(
            "https://questions-statements.parliament.uk/written-questions/detail/{}/{uin}",
            date_tabled.clone().unwrap_or_default(),
        ),
        date_tabled,
        date_answered: date_part(&opt_str_field(payload, "dateAnswered")),
        answering_body_name: opt_str_field(payload, "answeringBodyName"),
        created_at: opt_str_field(payload, "created_at"),
    })
}

fn join_chunks(chunks: &[(u64, &str)]) -> String {
    chunks
        .iter()
        .map(|(_, text)| *text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Zero-based chunk index from a `{document_uri}_chunk_{k}` id.
fn chunk_index(chunk_id: &str) -> Option<u64> {
    chunk_id.rsplit("_chunk_").next()?.parse().ok()
}
