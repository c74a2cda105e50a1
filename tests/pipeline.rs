//! End-to-end ingestion tests over fakes: harvest → queue → process →
//! vector store, plus failure-path and audit behavior.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use parliament_mcp::auditor::{Auditor, DayStatus};
use parliament_mcp::config::Settings;
use parliament_mcp::embedding::{EmbeddingService, MockEmbedder};
use parliament_mcp::error::{ParliamentError, Result};
use parliament_mcp::fetch::{Fetch, FetchResponse};
use parliament_mcp::harvester::{Harvester, HarvestType};
use parliament_mcp::processor::{Processor, ProcessorOptions};
use parliament_mcp::queue::{SourceType, WorkQueue};
use parliament_mcp::store::memory::MemoryVectorStore;
use parliament_mcp::store::{
    CollectionSpec, Filter, HybridQuery, Point, PointGroup, ScoredPoint, ScrollRequest,
    StoredRecord, VectorStore,
};
use tokio_util::sync::CancellationToken;

const DIMS: usize = 8;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

type Responder = Box<dyn FnMut(&[(&str, String)]) -> Result<FetchResponse> + Send>;

/// Routes requests by URL substring, first match wins. Register specific
/// routes before generic ones.
struct FakeFetcher {
    routes: Mutex<Vec<(String, Responder)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn route(
        self,
        url_part: &str,
        responder: impl FnMut(&[(&str, String)]) -> Result<FetchResponse> + Send + 'static,
    ) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((url_part.to_string(), Box::new(responder)));
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetch for FakeFetcher {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<FetchResponse> {
        self.calls.lock().unwrap().push(url.to_string());
        let mut routes = self.routes.lock().unwrap();
        for (part, responder) in routes.iter_mut() {
            if url.contains(part.as_str()) {
                return responder(query);
            }
        }
        Err(ParliamentError::Client {
            status: 404,
            body: format!("no fake route for {url}"),
        })
    }
}

fn json_ok(value: serde_json::Value) -> Result<FetchResponse> {
    Ok(FetchResponse {
        status: 200,
        body: value.to_string().into_bytes(),
    })
}

/// Accepts collection setup but rejects every upsert.
struct FailingStore;

#[async_trait]
impl VectorStore for FailingStore {
    async fn ensure_collection(&self, _spec: &CollectionSpec) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, _collection: &str, _points: Vec<Point>) -> Result<()> {
        Err(ParliamentError::Store("synthetic upsert failure".into()))
    }

    async fn query_hybrid(
        &self,
        _collection: &str,
        _query: HybridQuery,
    ) -> Result<Vec<ScoredPoint>> {
        Ok(Vec::new())
    }

    async fn query_hybrid_groups(
        &self,
        _collection: &str,
        _query: HybridQuery,
        _group_by: &str,
        _group_size: usize,
    ) -> Result<Vec<PointGroup>> {
        Ok(Vec::new())
    }

    async fn scroll(
        &self,
        _collection: &str,
        _request: ScrollRequest,
    ) -> Result<Vec<StoredRecord>> {
        Ok(Vec::new())
    }

    async fn scroll_groups(
        &self,
        _collection: &str,
        _filter: Option<Filter>,
        _group_by: &str,
        _group_size: usize,
        _limit: usize,
    ) -> Result<Vec<PointGroup>> {
        Ok(Vec::new())
    }

    async fn recommend(
        &self,
        _collection: &str,
        _positive: &[String],
        _negative: &[String],
        _filter: Option<Filter>,
        _limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        Ok(Vec::new())
    }

    async fn discover(
        &self,
        _collection: &str,
        _target: &str,
        _context: &[(String, String)],
        _filter: Option<Filter>,
        _limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn test_settings(dir: &tempfile::TempDir) -> Settings {
    let mut settings = Settings::from_env();
    settings.queue_db_path = dir.path().join("queue.db");
    settings.embedding_dimensions = DIMS;
    settings
}

fn contribution_item(ext_id: &str) -> serde_json::Value {
    json!({
        "MemberName": "Test Member",
        "MemberId": 1234,
        "AttributedTo": "Test Member (Testshire) (Lab)",
        "ItemId": 1,
        "ContributionExtId": ext_id,
        "ContributionText": "Short text",
        "ContributionTextFull": "Housing supply remains critical. The Minister should act now.",
        "HRSTag": "hs_Para",
        "HansardSection": "Commons Chamber",
        "DebateSection": "Housing Supply",
        "DebateSectionId": 7,
        "DebateSectionExtId": "DEB-999",
        "SittingDate": "2024-07-18T00:00:00",
        "Section": "Commons Chamber",
        "House": "Commons",
        "OrderInDebateSection": 1,
        "DebateSectionOrder": 1,
        "Rank": 0,
        "Timecode": null
    })
}

fn hansard_metadata(ext_id: &str) -> String {
    json!({
        "id": ext_id,
        "type": "Spoken",
        "item_data": contribution_item(ext_id),
    })
    .to_string()
}

fn pq_detail(id: i64) -> serde_json::Value {
    json!({
        "value": {
            "id": id,
            "askingMemberId": 172,
            "askingMember": {"id": 172, "name": "Asker", "party": "Labour"},
            "house": "Commons",
            "memberHasInterest": false,
            "dateTabled": "2024-07-18T00:00:00Z",
            "uin": "901234",
            "questionText": "What is the plan for school funding?",
            "answeringBodyId": 7,
            "answeringBodyName": "Department for Education",
            "isWithdrawn": false,
            "isNamedDay": false,
            "answerText": "Funding will increase next year.",
            "dateAnswered": "2024-07-25T00:00:00Z",
            "attachmentCount": 0
        }
    })
}

fn overview_sections() -> serde_json::Value {
    json!([
        {"Id": 1, "Title": "Commons Chamber", "ParentId": null, "ExternalId": "ROOT-1"},
        {"Id": 2, "Title": "Housing Supply", "ParentId": 1, "ExternalId": "DEB-999"}
    ])
}

fn empty_contributions_page() -> serde_json::Value {
    json!({"Results": [], "TotalResultCount": 0})
}

fn build_processor(
    queue: Arc<WorkQueue>,
    fetcher: Arc<dyn Fetch>,
    store: Arc<dyn VectorStore>,
    settings: &Settings,
) -> Processor {
    let embedder = Arc::new(EmbeddingService::new(
        Arc::new(MockEmbedder::new(DIMS)),
        10_000.0,
    ));
    Processor::new(queue, fetcher.clone(), fetcher, embedder, store, settings)
}

fn drain_options(batch_size: usize) -> ProcessorOptions {
    ProcessorOptions {
        batch_size,
        loop_forever: false,
        max_items: 0,
    }
}

// ---------------------------------------------------------------------------
// Harvest
// ---------------------------------------------------------------------------

#[tokio::test]
async fn harvest_single_hansard_day_enqueues_pending_rows() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(&dir);
    let queue = Arc::new(WorkQueue::open(&settings.queue_db_path).unwrap());

    let fetcher: Arc<dyn Fetch> = Arc::new(
        FakeFetcher::new()
            .route("/search/contributions/Spoken.json", |_query| {
                json_ok(json!({
                    "Results": [contribution_item("C-1"), contribution_item("C-2")],
                    "TotalResultCount": 2
                }))
            })
            .route("/search/contributions/", |_query| {
                json_ok(empty_contributions_page())
            }),
    );

    let harvester = Harvester::new(fetcher, queue.clone(), &settings);
    let day = chrono::NaiveDate::from_ymd_opt(2024, 7, 18).unwrap();
    harvester
        .harvest_date_range(day, day, HarvestType::Hansard)
        .await;

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.total(), 2);

    let daily = queue
        .get_daily_stats("2024-07-18", Some(SourceType::Hansard))
        .await
        .unwrap();
    assert_eq!(daily.pending, 2);

    let batch = queue.get_pending_batch(10).await.unwrap();
    assert!(batch.iter().all(|i| i.source_type == SourceType::Hansard));
    assert!(batch.iter().any(|i| i.id == "hansard_C-1"));

    // Overlapping re-harvest is a no-op.
    harvester
        .harvest_date_range(day, day, HarvestType::Hansard)
        .await;
    assert_eq!(queue.get_stats().await.unwrap().total(), 2);
}

#[tokio::test]
async fn harvest_pqs_dedupes_tabled_and_answered_streams() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(&dir);
    let queue = Arc::new(WorkQueue::open(&settings.queue_db_path).unwrap());

    // The same question shows up in both the tabled and answered streams.
    let fetcher: Arc<dyn Fetch> = Arc::new(FakeFetcher::new().route(
        "/writtenquestions/questions",
        |_query| {
            json_ok(json!({
                "results": [{"value": {"id": 555}}],
                "totalResults": 1
            }))
        },
    ));

    let harvester = Harvester::new(fetcher, queue.clone(), &settings);
    let day = chrono::NaiveDate::from_ymd_opt(2024, 7, 18).unwrap();
    harvester
        .harvest_date_range(day, day, HarvestType::Pqs)
        .await;

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.total(), 1, "one row despite two streams");

    let batch = queue.get_pending_batch(10).await.unwrap();
    assert_eq!(batch[0].id, "pq_555");
    assert_eq!(batch[0].source_type, SourceType::Pq);
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

#[tokio::test]
async fn drain_to_completion_stores_points() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(&dir);
    let queue = Arc::new(WorkQueue::open(&settings.queue_db_path).unwrap());

    for i in 0..5 {
        let ext_id = format!("C-{i}");
        queue
            .add_item(
                &format!("hansard_{ext_id}"),
                SourceType::Hansard,
                "2024-07-18",
                Some(hansard_metadata(&ext_id)),
            )
            .await
            .unwrap();
    }

    let fetcher: Arc<dyn Fetch> = Arc::new(
        FakeFetcher::new().route("/overview/sectionsforday.json", |_query| {
            json_ok(overview_sections())
        }),
    );
    let store = Arc::new(MemoryVectorStore::new());
    let processor = build_processor(queue.clone(), fetcher, store.clone(), &settings);

    let processed = processor
        .run(drain_options(5), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(processed, 5);

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.completed, 5);
    assert_eq!(stats.failed, 0);

    assert!(store.point_count(&settings.hansard_collection).await >= 5);

    // Chunk ids are deterministic and payloads carry the resolved
    // debate hierarchy.
    let records = store
        .scroll(
            &settings.hansard_collection,
            ScrollRequest {
                filter: None,
                limit: 100,
                order_by: None,
            },
        )
        .await
        .unwrap();
    for record in &records {
        assert!(record.id.starts_with("debate_DEB-999_contrib_C-"));
        assert!(record.id.contains("_chunk_"));
        let parents = record.payload.get("debate_parents").unwrap();
        assert_eq!(parents[0]["Title"], "Commons Chamber");
        assert_eq!(parents[1]["ExternalId"], "DEB-999");
        assert!(record.payload.get("ContributionTextFull").is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn transient_pq_error_is_retried_to_success() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(&dir);
    let queue = Arc::new(WorkQueue::open(&settings.queue_db_path).unwrap());
    queue
        .add_item(
            "pq_555",
            SourceType::Pq,
            "2024-07-18",
            Some(json!({"id": 555, "type": "tabled"}).to_string()),
        )
        .await
        .unwrap();

    let mut detail_calls = 0u32;
    let fetcher: Arc<dyn Fetch> = Arc::new(FakeFetcher::new().route(
        "/writtenquestions/questions/555",
        move |_query| {
            detail_calls += 1;
            if detail_calls == 1 {
                Err(ParliamentError::Transient("503 from upstream".into()))
            } else {
                json_ok(pq_detail(555))
            }
        },
    ));

    let store = Arc::new(MemoryVectorStore::new());
    let processor = build_processor(queue.clone(), fetcher, store.clone(), &settings);
    processor
        .run(drain_options(5), CancellationToken::new())
        .await
        .unwrap();

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.completed, 1, "retried past the 503");
    assert_eq!(stats.failed, 0);

    // Question and answer chunks landed in the PQ collection.
    let ids = store.point_ids(&settings.pq_collection).await;
    assert!(ids.contains(&"pq_555_chunk_0".to_string()));
    assert!(ids.len() >= 2);
}

#[tokio::test]
async fn invalid_item_fails_alone_without_aborting_batch() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(&dir);
    let queue = Arc::new(WorkQueue::open(&settings.queue_db_path).unwrap());

    queue
        .add_item(
            "hansard_good",
            SourceType::Hansard,
            "2024-07-18",
            Some(hansard_metadata("good")),
        )
        .await
        .unwrap();
    // Unknown upstream field -> strict decode failure.
    let mut bad_item = contribution_item("bad");
    bad_item["SomeBrandNewField"] = json!(true);
    queue
        .add_item(
            "hansard_bad",
            SourceType::Hansard,
            "2024-07-18",
            Some(json!({"id": "bad", "type": "Spoken", "item_data": bad_item}).to_string()),
        )
        .await
        .unwrap();

    let fetcher: Arc<dyn Fetch> = Arc::new(
        FakeFetcher::new().route("/overview/sectionsforday.json", |_query| {
            json_ok(overview_sections())
        }),
    );
    let store = Arc::new(MemoryVectorStore::new());
    let processor = build_processor(queue.clone(), fetcher, store.clone(), &settings);
    processor
        .run(drain_options(10), CancellationToken::new())
        .await
        .unwrap();

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert!(store.point_count(&settings.hansard_collection).await >= 1);
}

#[tokio::test]
async fn upsert_failure_fails_whole_batch_then_retry_drains() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(&dir);
    let queue = Arc::new(WorkQueue::open(&settings.queue_db_path).unwrap());

    for ext_id in ["C-1", "C-2"] {
        queue
            .add_item(
                &format!("hansard_{ext_id}"),
                SourceType::Hansard,
                "2024-07-18",
                Some(hansard_metadata(ext_id)),
            )
            .await
            .unwrap();
    }

    let route_overview = || {
        FakeFetcher::new().route("/overview/sectionsforday.json", |_query| {
            json_ok(overview_sections())
        })
    };

    // First drain: the store rejects the batch upsert.
    let fetcher: Arc<dyn Fetch> = Arc::new(route_overview());
    let processor = build_processor(queue.clone(), fetcher, Arc::new(FailingStore), &settings);
    processor
        .run(drain_options(10), CancellationToken::new())
        .await
        .unwrap();

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.failed, 2, "batch error fails every claimed id");
    assert_eq!(stats.completed, 0);

    // Operator re-drives: retry-failed, then a drain with a healthy store.
    queue.retry_failed().await.unwrap();
    let fetcher: Arc<dyn Fetch> = Arc::new(route_overview());
    let store = Arc::new(MemoryVectorStore::new());
    let processor = build_processor(queue.clone(), fetcher, store.clone(), &settings);
    processor
        .run(drain_options(10), CancellationToken::new())
        .await
        .unwrap();

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.failed, 0, "no FAILED items after a clean drain");
    assert_eq!(stats.completed, 2);
}

#[tokio::test]
async fn reprocessing_overwrites_points_instead_of_duplicating() {
    let store = Arc::new(MemoryVectorStore::new());
    let mut first_ids = Vec::new();

    for round in 0..2 {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(&dir);
        let queue = Arc::new(WorkQueue::open(&settings.queue_db_path).unwrap());
        queue
            .add_item(
                "hansard_C-1",
                SourceType::Hansard,
                "2024-07-18",
                Some(hansard_metadata("C-1")),
            )
            .await
            .unwrap();

        let fetcher: Arc<dyn Fetch> = Arc::new(
            FakeFetcher::new().route("/overview/sectionsforday.json", |_query| {
                json_ok(overview_sections())
            }),
        );
        let processor = build_processor(queue.clone(), fetcher, store.clone(), &settings);
        processor
            .run(drain_options(5), CancellationToken::new())
            .await
            .unwrap();

        let mut ids = store.point_ids(&settings.hansard_collection).await;
        ids.sort();
        if round == 0 {
            first_ids = ids;
        } else {
            assert_eq!(ids, first_ids, "same chunk ids, no duplicates");
        }
    }
}

#[tokio::test]
async fn crash_recovery_resets_and_drains() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(&dir);
    let queue = Arc::new(WorkQueue::open(&settings.queue_db_path).unwrap());
    queue
        .add_item(
            "hansard_C-1",
            SourceType::Hansard,
            "2024-07-18",
            Some(hansard_metadata("C-1")),
        )
        .await
        .unwrap();

    // Simulate a crash mid-batch: the item was claimed but never finished.
    queue
        .mark_processing(&["hansard_C-1".to_string()])
        .await
        .unwrap();
    assert_eq!(queue.get_stats().await.unwrap().processing, 1);

    queue.reset_processing().await.unwrap();

    let fetcher: Arc<dyn Fetch> = Arc::new(
        FakeFetcher::new().route("/overview/sectionsforday.json", |_query| {
            json_ok(overview_sections())
        }),
    );
    let store = Arc::new(MemoryVectorStore::new());
    let processor = build_processor(queue.clone(), fetcher, store.clone(), &settings);
    processor
        .run(drain_options(5), CancellationToken::new())
        .await
        .unwrap();

    let stats = queue.get_stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.processing, 0);
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

fn zero_count_fetcher() -> FakeFetcher {
    FakeFetcher::new()
        .route("/search/contributions/", |_query| {
            json_ok(empty_contributions_page())
        })
        .route("/writtenquestions/questions", |_query| {
            json_ok(json!({"results": [], "totalResults": 0}))
        })
}

#[tokio::test]
async fn audit_empty_sitting_day_is_ok_not_missing() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(&dir);
    let queue = Arc::new(WorkQueue::open(&settings.queue_db_path).unwrap());

    let auditor = Auditor::new(Arc::new(zero_count_fetcher()), queue, &settings);
    let day = chrono::NaiveDate::from_ymd_opt(2024, 12, 25).unwrap();
    let reports = auditor
        .audit_date_range(day, day, HarvestType::All)
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.status == DayStatus::EmptyOk));
}

#[tokio::test]
async fn audit_flags_missing_day() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(&dir);
    let queue = Arc::new(WorkQueue::open(&settings.queue_db_path).unwrap());

    let fetcher = FakeFetcher::new()
        .route("/search/contributions/", |_query| {
            json_ok(json!({"Results": [], "TotalResultCount": 3}))
        })
        .route("/writtenquestions/questions", |_query| {
            json_ok(json!({"results": [], "totalResults": 1}))
        });

    let auditor = Auditor::new(Arc::new(fetcher), queue, &settings);
    let day = chrono::NaiveDate::from_ymd_opt(2024, 7, 18).unwrap();
    let reports = auditor
        .audit_date_range(day, day, HarvestType::All)
        .await
        .unwrap();

    // Hansard: 4 contribution streams x 3. PQs: tabled 1 + answered 1.
    assert_eq!(
        reports[0].status,
        DayStatus::Missing { upstream_total: 12 }
    );
    assert_eq!(reports[1].status, DayStatus::Missing { upstream_total: 2 });
}

#[tokio::test]
async fn audit_incomplete_day_skips_upstream() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(&dir);
    let queue = Arc::new(WorkQueue::open(&settings.queue_db_path).unwrap());
    queue
        .add_item("hansard_C-1", SourceType::Hansard, "2024-07-18", None)
        .await
        .unwrap();

    let fetcher = Arc::new(zero_count_fetcher());
    let auditor = Auditor::new(fetcher.clone(), queue, &settings);
    let day = chrono::NaiveDate::from_ymd_opt(2024, 7, 18).unwrap();
    let reports = auditor
        .audit_date_range(day, day, HarvestType::Hansard)
        .await
        .unwrap();

    assert!(matches!(
        reports[0].status,
        DayStatus::Incomplete { pending: 1, .. }
    ));
    assert_eq!(fetcher.call_count(), 0, "incomplete days never hit upstream");
}

#[tokio::test]
async fn audit_completed_day_is_ok_without_upstream_equality() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(&dir);
    let queue = Arc::new(WorkQueue::open(&settings.queue_db_path).unwrap());
    queue
        .add_item("hansard_C-1", SourceType::Hansard, "2024-07-18", None)
        .await
        .unwrap();
    queue
        .mark_completed(&["hansard_C-1".to_string()])
        .await
        .unwrap();

    let fetcher = Arc::new(zero_count_fetcher());
    let auditor = Auditor::new(fetcher.clone(), queue, &settings);
    let day = chrono::NaiveDate::from_ymd_opt(2024, 7, 18).unwrap();
    let reports = auditor
        .audit_date_range(day, day, HarvestType::Hansard)
        .await
        .unwrap();

    assert_eq!(reports[0].status, DayStatus::Ok { completed: 1 });
    assert_eq!(fetcher.call_count(), 0, "no upstream call for a clean day");
}
