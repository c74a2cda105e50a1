//! Queue drain: claim PENDING batches, hydrate full records, resolve the
//! debate hierarchy, chunk + embed + upsert, and write back item state.
//!
//! Failure policy: hydration problems fail only the offending item;
//! embedding/upsert problems fail every claimed id in the batch together
//! so operators can re-drive them with `retry-failed`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::chunker::SentenceChunker;
use crate::config::Settings;
use crate::embedding::EmbeddingService;
use crate::error::{ParliamentError, Result};
use crate::fetch::{Fetch, backoff_with_rate_limit_hint, retry_async};
use crate::models::{
    ChunkRecord, Contribution, DaySection, DebateParent, QuestionDetail, SourceRecord,
};
use crate::queue::{QueueItem, SourceType, WorkQueue};
use crate::sparse::SparseEncoder;
use crate::store::{CollectionSpec, Point, VectorStore};

/// Points per vector-store upsert call.
const UPSERT_BATCH_SIZE: usize = 100;

/// Retry policy for the per-item PQ detail fetch.
const PQ_FETCH_ATTEMPTS: u32 = 4;
const PQ_BACKOFF_MIN_SECS: u64 = 2;
const PQ_BACKOFF_MAX_SECS: u64 = 30;

/// Idle wait between polls when running with `loop_forever`.
const IDLE_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct ProcessorOptions {
    pub batch_size: usize,
    /// Keep polling after the queue drains instead of exiting.
    pub loop_forever: bool,
    /// Stop after this many items; 0 means unlimited.
    pub max_items: usize,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            loop_forever: false,
            max_items: 0,
        }
    }
}

pub struct Processor {
    queue: Arc<WorkQueue>,
    /// PQ detail fetches.
    fetcher: Arc<dyn Fetch>,
    /// Overview lookups; usually the cache-decorated fetcher.
    overview_fetcher: Arc<dyn Fetch>,
    embedder: Arc<EmbeddingService>,
    store: Arc<dyn VectorStore>,
    sparse: SparseEncoder,
    chunker: SentenceChunker,
    hansard_base_url: String,
    pqs_base_url: String,
    hansard_collection: String,
    pq_collection: String,
    embedding_dimensions: usize,
    sections_cache: tokio::sync::Mutex<HashMap<(String, String), Arc<Vec<DaySection>>>>,
}

impl Processor {
    pub fn new(
        queue: Arc<WorkQueue>,
        fetcher: Arc<dyn Fetch>,
        overview_fetcher: Arc<dyn Fetch>,
        embedder: Arc<EmbeddingService>,
        store: Arc<dyn VectorStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            queue,
            fetcher,
            overview_fetcher,
            embedder,
            store,
            sparse: SparseEncoder::new(),
            chunker: SentenceChunker::new(settings.chunk_size, settings.sentence_overlap),
            hansard_base_url: settings.hansard_base_url.clone(),
            pqs_base_url: settings.pqs_base_url.clone(),
            hansard_collection: settings.hansard_collection.clone(),
            pq_collection: settings.pq_collection.clone(),
            embedding_dimensions: settings.embedding_dimensions,
            sections_cache: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub async fn ensure_collections(&self) -> Result<()> {
        self.store
            .ensure_collection(&CollectionSpec::hansard_contributions(
                &self.hansard_collection,
                self.embedding_dimensions,
            ))
            .await?;
        self.store
            .ensure_collection(&CollectionSpec::parliamentary_questions(
                &self.pq_collection,
                self.embedding_dimensions,
            ))
            .await
    }

    /// Drain the queue. Returns the number of items claimed this run.
    /// Cancellation lets the in-flight batch finish; anything still
    /// PROCESSING afterwards is swept back by `reset`.
    pub async fn run(&self, options: ProcessorOptions, cancel: CancellationToken) -> Result<u64> {
        self.ensure_collections().await?;

        let mut session_total = 0u64;
        loop {
            if cancel.is_cancelled() {
                tracing::info!("interrupted, stopping after {session_total} items");
                break;
            }
            if options.max_items > 0 && session_total >= options.max_items as u64 {
                tracing::info!("reached limit of {} items", options.max_items);
                break;
            }

            let items = self.queue.get_pending_batch(options.batch_size).await?;
            if items.is_empty() {
                let stats = self.queue.get_stats().await?;
                if options.loop_forever {
                    tracing::info!("queue empty ({stats}), waiting {}s", IDLE_WAIT.as_secs());
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(IDLE_WAIT) => {}
                    }
                    continue;
                }
                tracing::info!("queue drained ({stats})");
                break;
            }

            let stats = self.queue.get_stats().await?;
            let done = stats.completed + stats.failed;
            let total = stats.total();
            let progress = if total > 0 {
                done as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            tracing::info!(
                "processing batch of {} items ({progress:.2}% | {done}/{total})",
                items.len()
            );

            let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
            self.queue.mark_processing(&ids).await?;

            let (hansard_items, pq_items): (Vec<_>, Vec<_>) = items
                .iter()
                .partition(|i| i.source_type == SourceType::Hansard);

            if !hansard_items.is_empty() {
                self.process_hansard_items(&hansard_items).await?;
            }
            if !pq_items.is_empty() {
                self.process_pq_items(&pq_items).await?;
            }

            session_total += items.len() as u64;
        }
        Ok(session_total)
    }

    // -- Hansard branch -----------------------------------------------------

    async fn process_hansard_items(&self, items: &[&QueueItem]) -> Result<()> {
        let mut records = Vec::new();
        let mut ready_ids = Vec::new();
        for item in items {
            match self.hydrate_contribution(item).await {
                Ok(contribution) => {
                    records.push(SourceRecord::Contribution(Box::new(contribution)));
                    ready_ids.push(item.id.clone());
                }
                Err(e) => {
                    tracing::error!("failed to hydrate hansard item {}: {e}", item.id);
                    self.queue.mark_failed(&item.id, &e.to_string()).await?;
                }
            }
        }
        self.store_records(&records, &ready_ids, &self.hansard_collection)
            .await
    }

    async fn hydrate_contribution(&self, item: &QueueItem) -> Result<Contribution> {
        let metadata = item
            .metadata
            .as_deref()
            .ok_or_else(|| ParliamentError::Validation("missing metadata".into()))?;
        let meta: serde_json::Value = serde_json::from_str(metadata)
            .map_err(|e| ParliamentError::Validation(format!("metadata parse: {e}")))?;
        let item_data = meta
            .get("item_data")
            .ok_or_else(|| ParliamentError::Validation("missing item_data in metadata".into()))?;

        let mut contribution: Contribution = serde_json::from_value(item_data.clone())
            .map_err(|e| ParliamentError::Validation(format!("contribution decode: {e}")))?;

        if let Some(sitting_date) = contribution.sitting_date {
            let date = sitting_date.format("%Y-%m-%d").to_string();
            let house = contribution.house.clone().unwrap_or_default();
            contribution.debate_parents = Some(
                self.debate_parents(
                    &date,
                    &house,
                    contribution.debate_section_ext_id.as_deref(),
                )
                .await?,
            );
        }
        Ok(contribution)
    }

    /// Walk the day's section tree upward from the target section and
    /// return the chain root→leaf.
    async fn debate_parents(
        &self,
        date: &str,
        house: &str,
        debate_section_ext_id: Option<&str>,
    ) -> Result<Vec<DebateParent>> {
        let Some(ext_id) = debate_section_ext_id else {
            return Ok(Vec::new());
        };
        let sections = self.day_sections(date, house).await?;

        let by_id: HashMap<i64, &DaySection> = sections.iter().map(|s| (s.id, s)).collect();
        let Some(leaf) = sections
            .iter()
            .find(|s| s.external_id.as_deref() == Some(ext_id))
        else {
            return Ok(Vec::new());
        };

        let mut chain = Vec::new();
        let mut current = Some(leaf);
        while let Some(section) = current {
            chain.push(DebateParent {
                id: section.id,
                title: section.title.clone().unwrap_or_default(),
                parent_id: section.parent_id,
                external_id: section.external_id.clone().unwrap_or_default(),
            });
            // Malformed parent links must not loop forever.
            if chain.len() > 64 {
                break;
            }
            current = section.parent_id.and_then(|pid| by_id.get(&pid).copied());
        }
        chain.reverse();
        Ok(chain)
    }

    async fn day_sections(&self, date: &str, house: &str) -> Result<Arc<Vec<DaySection>>> {
        let key = (date.to_string(), house.to_string());
        {
            let cache = self.sections_cache.lock().await;
            if let Some(sections) = cache.get(&key) {
                return Ok(sections.clone());
            }
        }

        let url = format!("{}/overview/sectionsforday.json", self.hansard_base_url);
        let query = [("date", date.to_string()), ("house", house.to_string())];
        let sections: Vec<DaySection> = self.overview_fetcher.get(&url, &query).await?.json()?;
        let sections = Arc::new(sections);

        self.sections_cache
            .lock()
            .await
            .insert(key, sections.clone());
        Ok(sections)
    }

    // -- PQ branch ----------------------------------------------------------

    async fn process_pq_items(&self, items: &[&QueueItem]) -> Result<()> {
        let mut records = Vec::new();
        let mut ready_ids = Vec::new();
        for item in items {
            match self.hydrate_question(item).await {
                Ok(question) => {
                    records.push(SourceRecord::Question(Box::new(question)));
                    ready_ids.push(item.id.clone());
                }
                Err(e) => {
                    tracing::error!("failed to hydrate PQ {}: {e}", item.id);
                    self.queue.mark_failed(&item.id, &e.to_string()).await?;
                }
            }
        }
        self.store_records(&records, &ready_ids, &self.pq_collection)
            .await
    }

    async fn hydrate_question(&self, item: &QueueItem) -> Result<crate::models::ParliamentaryQuestion> {
        let metadata = item
            .metadata
            .as_deref()
            .ok_or_else(|| ParliamentError::Validation("missing metadata".into()))?;
        let meta: serde_json::Value = serde_json::from_str(metadata)
            .map_err(|e| ParliamentError::Validation(format!("metadata parse: {e}")))?;
        let pq_id = meta
            .get("id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ParliamentError::Validation("missing question id in metadata".into()))?;

        let url = format!("{}/writtenquestions/questions/{pq_id}", self.pqs_base_url);
        let query = [("expandMember", "true".to_string())];
        let response = retry_async(
            PQ_FETCH_ATTEMPTS,
            || self.fetcher.get(&url, &query),
            backoff_with_rate_limit_hint(PQ_BACKOFF_MIN_SECS, PQ_BACKOFF_MAX_SECS),
        )
        .await?;

        let detail: QuestionDetail = response.json()?;
        Ok(detail.value)
    }

    // -- Shared chunk → embed → upsert --------------------------------------

    async fn store_records(
        &self,
        records: &[SourceRecord],
        ids: &[String],
        collection: &str,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        match self.chunk_embed_upsert(records, collection).await {
            Ok(point_count) => {
                self.queue.mark_completed(ids).await?;
                tracing::info!(
                    "stored {point_count} points for {} records in {collection}",
                    records.len()
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("batch store failed for {collection}: {e}");
                let message = format!("batch store error: {e}");
                for id in ids {
                    self.queue.mark_failed(id, &message).await?;
                }
                Ok(())
            }
        }
    }

    async fn chunk_embed_upsert(
        &self,
        records: &[SourceRecord],
        collection: &str,
    ) -> Result<usize> {
        let chunks: Vec<ChunkRecord> = records
            .iter()
            .flat_map(|r| r.to_chunks(&self.chunker))
            .collect();
        // Records with no embeddable text still complete, with no points.
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let dense = self.embedder.embed_all(&texts).await?;

        let points: Vec<Point> = chunks
            .into_iter()
            .zip(dense)
            .map(|(chunk, dense)| Point {
                sparse: self.sparse.encode(&chunk.text),
                id: chunk.chunk_id,
                dense,
                payload: chunk.payload,
            })
            .collect();

        let total = points.len();
        for batch in points.chunks(UPSERT_BATCH_SIZE) {
            self.store.upsert(collection, batch.to_vec()).await?;
        }
        Ok(total)
    }
}
