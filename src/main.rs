use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rmcp::{ServiceExt, transport::stdio};
use tokio_util::sync::CancellationToken;

use parliament_mcp::auditor::{Auditor, DayStatus};
use parliament_mcp::config::Settings;
use parliament_mcp::embedding::{EmbeddingService, OpenAiEmbedder};
use parliament_mcp::fetch::{CachedFetcher, Fetch, HttpFetcher};
use parliament_mcp::harvester::{Harvester, HarvestType};
use parliament_mcp::processor::{Processor, ProcessorOptions};
use parliament_mcp::query::QueryHandler;
use parliament_mcp::queue::WorkQueue;
use parliament_mcp::server::ParliamentServer;
use parliament_mcp::store::{VectorStore, memory::MemoryVectorStore};

#[derive(Parser)]
#[command(name = "parliament-mcp", about = "Ingest UK parliamentary records into a vector store and serve hybrid search over them")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    All,
    Hansard,
    Pqs,
}

impl From<SourceArg> for HarvestType {
    fn from(value: SourceArg) -> Self {
        match value {
            SourceArg::All => HarvestType::All,
            SourceArg::Hansard => HarvestType::Hansard,
            SourceArg::Pqs => HarvestType::Pqs,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Initialize the local queue database
    InitDb,
    /// Fetch record ids for a date range and populate the queue
    Harvest {
        /// Start date, YYYY-MM-DD
        #[arg(long)]
        start_date: String,
        /// End date, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long, value_enum, default_value_t = SourceArg::All)]
        r#type: SourceArg,
    },
    /// Drain the queue: hydrate records, embed, and store points
    Process {
        /// Items claimed per batch
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
        /// Keep polling once the queue drains
        #[arg(long)]
        r#loop: bool,
        /// Stop after this many items (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
    /// Reset stuck PROCESSING items back to PENDING (crash recovery)
    Reset,
    /// Reset FAILED items back to PENDING for another attempt
    RetryFailed,
    /// Audit local completeness against the Parliament APIs
    Audit {
        /// Start date, YYYY-MM-DD
        #[arg(long)]
        start_date: String,
        /// End date, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long, value_enum, default_value_t = SourceArg::All)]
        r#type: SourceArg,
    },
    /// Serve the query tools as an MCP server over stdio
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // Load .env if present (silently ignored if missing)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Command::InitDb => {
            let _queue = WorkQueue::open(&settings.queue_db_path)?;
            tracing::info!("queue database ready at {}", settings.queue_db_path.display());
        }
        Command::Harvest {
            start_date,
            end_date,
            r#type,
        } => {
            let (start, end) = parse_range(&start_date, end_date.as_deref())?;
            let queue = Arc::new(WorkQueue::open(&settings.queue_db_path)?);
            let fetcher = base_fetcher(&settings);
            let harvester = Harvester::new(fetcher, queue.clone(), &settings);
            harvester.harvest_date_range(start, end, r#type.into()).await;
            let stats = queue.get_stats().await?;
            tracing::info!("harvest complete, queue: {stats}");
        }
        Command::Process {
            batch_size,
            r#loop,
            limit,
        } => {
            let queue = Arc::new(WorkQueue::open(&settings.queue_db_path)?);
            let fetcher = base_fetcher(&settings);
            let overview_fetcher = overview_fetcher(&settings, fetcher.clone())?;
            let embedder = Arc::new(build_embedding_service(&settings)?);
            let store = build_vector_store();

            let processor = Processor::new(
                queue.clone(),
                fetcher,
                overview_fetcher,
                embedder,
                store,
                &settings,
            );

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, finishing current batch");
                    signal_cancel.cancel();
                }
            });

            let options = ProcessorOptions {
                batch_size,
                loop_forever: r#loop,
                max_items: limit,
            };
            let processed = processor.run(options, cancel).await?;
            let stats = queue.get_stats().await?;
            tracing::info!("processed {processed} items this run, queue: {stats}");
        }
        Command::Reset => {
            let queue = WorkQueue::open(&settings.queue_db_path)?;
            let count = queue.reset_processing().await?;
            tracing::info!("reset {count} items");
        }
        Command::RetryFailed => {
            let queue = WorkQueue::open(&settings.queue_db_path)?;
            let count = queue.retry_failed().await?;
            tracing::info!("requeued {count} failed items");
        }
        Command::Audit {
            start_date,
            end_date,
            r#type,
        } => {
            let (start, end) = parse_range(&start_date, end_date.as_deref())?;
            let queue = Arc::new(WorkQueue::open(&settings.queue_db_path)?);
            let fetcher = base_fetcher(&settings);
            let auditor = Auditor::new(fetcher, queue, &settings);
            let reports = auditor.audit_date_range(start, end, r#type.into()).await?;

            let missing = reports
                .iter()
                .filter(|r| matches!(r.status, DayStatus::Missing { .. }))
                .count();
            let incomplete = reports
                .iter()
                .filter(|r| matches!(r.status, DayStatus::Incomplete { .. }))
                .count();
            tracing::info!(
                "audit complete: {} day-streams checked, {missing} missing, {incomplete} incomplete",
                reports.len()
            );
        }
        Command::Serve => {
            let embedder = Arc::new(build_embedding_service(&settings)?);
            let store = build_vector_store();
            let handler = Arc::new(QueryHandler::new(
                store,
                embedder,
                settings.hansard_collection.clone(),
                settings.pq_collection.clone(),
            ));

            tracing::info!("parliament-mcp serving on stdio");
            let service = ParliamentServer::new(handler)
                .serve(stdio())
                .await
                .inspect_err(|e| tracing::error!("serving error: {e:?}"))?;
            service.waiting().await?;
            tracing::info!("parliament-mcp shutting down");
        }
    }

    Ok(())
}

fn parse_range(start: &str, end: Option<&str>) -> anyhow::Result<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
        .with_context(|| format!("invalid start date: {start}"))?;
    let end = match end {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("invalid end date: {raw}"))?,
        None => Utc::now().date_naive(),
    };
    anyhow::ensure!(start <= end, "start date is after end date");
    Ok((start, end))
}

fn base_fetcher(settings: &Settings) -> Arc<dyn Fetch> {
    Arc::new(HttpFetcher::new(settings.http_max_rate_per_second))
}

/// Overview lookups are idempotent; cache them on disk when configured.
fn overview_fetcher(
    settings: &Settings,
    base: Arc<dyn Fetch>,
) -> anyhow::Result<Arc<dyn Fetch>> {
    match &settings.http_cache_dir {
        Some(dir) => {
            let cached = CachedFetcher::new(base, dir.clone())
                .with_context(|| format!("cannot create HTTP cache dir {}", dir.display()))?;
            Ok(Arc::new(cached))
        }
        None => Ok(base),
    }
}

fn build_embedding_service(settings: &Settings) -> anyhow::Result<EmbeddingService> {
    let (base_url, api_key) = settings.require_embedding_provider()?;
    let provider = OpenAiEmbedder::new(
        base_url,
        api_key,
        settings.embedding_model.clone(),
        settings.embedding_dimensions,
    );
    Ok(EmbeddingService::new(
        Arc::new(provider),
        settings.embedding_max_rate_per_second,
    ))
}

/// Single construction site for the vector store backend. The in-memory
/// reference store keeps local runs self-contained; deployments swap in
/// their backend here.
fn build_vector_store() -> Arc<dyn VectorStore> {
    tracing::warn!("using the in-memory vector store; points do not persist across runs");
    Arc::new(MemoryVectorStore::new())
}
