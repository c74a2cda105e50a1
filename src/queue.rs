//! Durable single-writer work queue backed by DuckDB.
//!
//! Architecture:
//! - [`WorkQueue`] is the async-facing handle, holding an
//!   `mpsc::Sender<Command>`
//! - A worker runs on `std::thread::spawn` (DuckDB is sync) and owns the
//!   connection; replies travel back on oneshot channels, so queue I/O
//!   never blocks the event loop
//! - One table, primary key `id`, secondary indexes on `status` and `date`
//!
//! Item lifecycle: PENDING → PROCESSING → COMPLETED | FAILED. Crash
//! recovery sweeps PROCESSING back to PENDING; `retry_failed` re-drives
//! FAILED items. The harvester creates rows, the processor owns every
//! transition out of PENDING.

use std::path::Path;
use std::sync::mpsc;

use chrono::{SecondsFormat, Utc};
use duckdb::params;
use tokio::sync::oneshot;

use crate::error::{ParliamentError, Result};

// ---------------------------------------------------------------------------
// Item model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    Hansard,
    Pq,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hansard => "hansard",
            Self::Pq => "pq",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "hansard" => Some(Self::Hansard),
            "pq" => Some(Self::Pq),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: String,
    pub source_type: SourceType,
    pub date: String,
    pub status: ItemStatus,
    pub attempts: i64,
    pub last_attempt: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<String>,
}

/// Status histogram for the whole queue or one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }

    pub fn in_flight(&self) -> u64 {
        self.pending + self.processing
    }

    fn record(&mut self, status: ItemStatus, count: u64) {
        match status {
            ItemStatus::Pending => self.pending += count,
            ItemStatus::Processing => self.processing += count,
            ItemStatus::Completed => self.completed += count,
            ItemStatus::Failed => self.failed += count,
        }
    }
}

impl std::fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} pending, {} processing, {} completed, {} failed",
            self.pending, self.processing, self.completed, self.failed
        )
    }
}

// ---------------------------------------------------------------------------
// Actor commands
// ---------------------------------------------------------------------------

type Reply<T> = oneshot::Sender<std::result::Result<T, String>>;

enum Command {
    Add {
        id: String,
        source_type: SourceType,
        date: String,
        metadata: Option<String>,
        reply: Reply<bool>,
    },
    PendingBatch {
        limit: usize,
        reply: Reply<Vec<QueueItem>>,
    },
    MarkProcessing {
        ids: Vec<String>,
        reply: Reply<()>,
    },
    MarkCompleted {
        ids: Vec<String>,
        reply: Reply<()>,
    },
    MarkFailed {
        id: String,
        error: String,
        reply: Reply<()>,
    },
    ResetProcessing {
        reply: Reply<usize>,
    },
    RetryFailed {
        reply: Reply<usize>,
    },
    Stats {
        reply: Reply<StatusCounts>,
    },
    DailyStats {
        date: String,
        source_type: Option<SourceType>,
        reply: Reply<StatusCounts>,
    },
    Shutdown,
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

pub struct WorkQueue {
    tx: mpsc::Sender<Command>,
    worker_handle: Option<std::thread::JoinHandle<()>>,
}

impl WorkQueue {
    /// Open (or create) the queue database and spawn the DB worker.
    /// The schema is applied here so `init-db` failures surface at startup.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = duckdb::Connection::open(db_path)
            .map_err(|e| ParliamentError::Queue(format!("failed to open queue db: {e}")))?;
        apply_schema(&conn)?;

        let (tx, rx) = mpsc::channel();
        let builder = std::thread::Builder::new().name("parliament-queue-db".into());
        let handle = builder
            .spawn(move || Worker::run(conn, rx))
            .map_err(|e| ParliamentError::Queue(format!("failed to spawn db worker: {e}")))?;

        Ok(Self {
            tx,
            worker_handle: Some(handle),
        })
    }

    async fn call<T>(&self, command: Command, reply_rx: oneshot::Receiver<std::result::Result<T, String>>) -> Result<T> {
        self.tx
            .send(command)
            .map_err(|_| ParliamentError::Queue("queue worker is gone".into()))?;
        reply_rx
            .await
            .map_err(|_| ParliamentError::Queue("queue worker dropped the reply".into()))?
            .map_err(ParliamentError::Queue)
    }

    /// Insert-or-ignore. Returns true iff the item was newly inserted.
    pub async fn add_item(
        &self,
        id: &str,
        source_type: SourceType,
        date: &str,
        metadata: Option<String>,
    ) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Command::Add {
                id: id.to_string(),
                source_type,
                date: date.to_string(),
                metadata,
                reply,
            },
            rx,
        )
        .await
    }

    /// Up to `limit` PENDING items ordered by (date ASC, id ASC). Does not
    /// mutate state; pair with `mark_processing` to claim.
    pub async fn get_pending_batch(&self, limit: usize) -> Result<Vec<QueueItem>> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::PendingBatch { limit, reply }, rx).await
    }

    pub async fn mark_processing(&self, ids: &[String]) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Command::MarkProcessing {
                ids: ids.to_vec(),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn mark_completed(&self, ids: &[String]) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Command::MarkCompleted {
                ids: ids.to_vec(),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Command::MarkFailed {
                id: id.to_string(),
                error: error.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Sweep stuck PROCESSING items back to PENDING (crash recovery).
    pub async fn reset_processing(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::ResetProcessing { reply }, rx).await
    }

    /// Move FAILED items back to PENDING and clear their errors.
    pub async fn retry_failed(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::RetryFailed { reply }, rx).await
    }

    pub async fn get_stats(&self) -> Result<StatusCounts> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::Stats { reply }, rx).await
    }

    pub async fn get_daily_stats(
        &self,
        date: &str,
        source_type: Option<SourceType>,
    ) -> Result<StatusCounts> {
        let (reply, rx) = oneshot::channel();
        self.call(
            Command::DailyStats {
                date: date.to_string(),
                source_type,
                reply,
            },
            rx,
        )
        .await
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

fn apply_schema(conn: &duckdb::Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS queue (
            id TEXT PRIMARY KEY,
            source_type TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            attempts BIGINT NOT NULL DEFAULT 0,
            last_attempt TEXT,
            error_message TEXT,
            metadata TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_queue_status ON queue (status);
        CREATE INDEX IF NOT EXISTS idx_queue_date ON queue (date);",
    )
    .map_err(|e| ParliamentError::Queue(format!("schema setup failed: {e}")))
}

// ---------------------------------------------------------------------------
// Background worker
// ---------------------------------------------------------------------------

struct Worker {
    conn: duckdb::Connection,
}

impl Worker {
    fn run(conn: duckdb::Connection, rx: mpsc::Receiver<Command>) {
        let worker = Worker { conn };
        loop {
            match rx.recv() {
                Ok(Command::Add {
                    id,
                    source_type,
                    date,
                    metadata,
                    reply,
                }) => {
                    let _ = reply.send(worker.add(&id, source_type, &date, metadata.as_deref()));
                }
                Ok(Command::PendingBatch { limit, reply }) => {
                    let _ = reply.send(worker.pending_batch(limit));
                }
                Ok(Command::MarkProcessing { ids, reply }) => {
                    let _ = reply.send(worker.mark_processing(&ids));
                }
                Ok(Command::MarkCompleted { ids, reply }) => {
                    let _ = reply.send(worker.mark_completed(&ids));
                }
                Ok(Command::MarkFailed { id, error, reply }) => {
                    let _ = reply.send(worker.mark_failed(&id, &error));
                }
                Ok(Command::ResetProcessing { reply }) => {
                    let _ = reply.send(worker.reset_processing());
                }
                Ok(Command::RetryFailed { reply }) => {
                    let _ = reply.send(worker.retry_failed());
                }
                Ok(Command::Stats { reply }) => {
                    let _ = reply.send(worker.stats(None, None));
                }
                Ok(Command::DailyStats {
                    date,
                    source_type,
                    reply,
                }) => {
                    let _ = reply.send(worker.stats(Some(&date), source_type));
                }
                Ok(Command::Shutdown) | Err(_) => {
                    tracing::debug!("queue worker shutting down");
                    break;
                }
            }
        }
    }

    fn add(
        &self,
        id: &str,
        source_type: SourceType,
        date: &str,
        metadata: Option<&str>,
    ) -> std::result::Result<bool, String> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO queue (id, source_type, date, status, metadata)
                 VALUES (?1, ?2, ?3, 'PENDING', ?4)",
                params![id, source_type.as_str(), date, metadata],
            )
            .map_err(|e| format!("add_item failed: {e}"))?;
        Ok(inserted > 0)
    }

    fn pending_batch(&self, limit: usize) -> std::result::Result<Vec<QueueItem>, String> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT id, source_type, date, status, attempts, last_attempt, error_message, metadata
                 FROM queue
                 WHERE status = 'PENDING'
                 ORDER BY date ASC, id ASC
                 LIMIT {limit}"
            ))
            .map_err(|e| format!("pending batch query failed: {e}"))?;

        let mut rows = stmt
            .query([])
            .map_err(|e| format!("pending batch query failed: {e}"))?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().map_err(|e| format!("row read failed: {e}"))? {
            items.push(read_item(row)?);
        }
        Ok(items)
    }

    fn mark_processing(&self, ids: &[String]) -> std::result::Result<(), String> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut stmt = self
            .conn
            .prepare(
                "UPDATE queue
                 SET status = 'PROCESSING', last_attempt = ?1, attempts = attempts + 1
                 WHERE id = ?2",
            )
            .map_err(|e| format!("mark_processing prepare failed: {e}"))?;
        for id in ids {
            stmt.execute(params![now, id])
                .map_err(|e| format!("mark_processing failed for {id}: {e}"))?;
        }
        Ok(())
    }

    fn mark_completed(&self, ids: &[String]) -> std::result::Result<(), String> {
        let mut stmt = self
            .conn
            .prepare(
                "UPDATE queue
                 SET status = 'COMPLETED', error_message = NULL
                 WHERE id = ?1",
            )
            .map_err(|e| format!("mark_completed prepare failed: {e}"))?;
        for id in ids {
            stmt.execute(params![id])
                .map_err(|e| format!("mark_completed failed for {id}: {e}"))?;
        }
        Ok(())
    }

    fn mark_failed(&self, id: &str, error: &str) -> std::result::Result<(), String> {
        self.conn
            .execute(
                "UPDATE queue SET status = 'FAILED', error_message = ?1 WHERE id = ?2",
                params![error, id],
            )
            .map_err(|e| format!("mark_failed failed for {id}: {e}"))?;
        Ok(())
    }

    fn reset_processing(&self) -> std::result::Result<usize, String> {
        let count = self
            .conn
            .execute(
                "UPDATE queue SET status = 'PENDING' WHERE status = 'PROCESSING'",
                [],
            )
            .map_err(|e| format!("reset_processing failed: {e}"))?;
        if count > 0 {
            tracing::info!("reset {count} stuck items from PROCESSING to PENDING");
        }
        Ok(count)
    }

    fn retry_failed(&self) -> std::result::Result<usize, String> {
        let count = self
            .conn
            .execute(
                "UPDATE queue
                 SET status = 'PENDING', error_message = NULL
                 WHERE status = 'FAILED'",
                [],
            )
            .map_err(|e| format!("retry_failed failed: {e}"))?;
        if count > 0 {
            tracing::info!("reset {count} FAILED items to PENDING for retry");
        } else {
            tracing::info!("no FAILED items found to retry");
        }
        Ok(count)
    }

    fn stats(
        &self,
        date: Option<&str>,
        source_type: Option<SourceType>,
    ) -> std::result::Result<StatusCounts, String> {
        match (date, source_type) {
            (None, _) => {
                self.stats_query("SELECT status, COUNT(*) FROM queue GROUP BY status", params![])
            }
            (Some(d), None) => self.stats_query(
                "SELECT status, COUNT(*) FROM queue WHERE date = ?1 GROUP BY status",
                params![d],
            ),
            (Some(d), Some(st)) => self.stats_query(
                "SELECT status, COUNT(*) FROM queue
                 WHERE date = ?1 AND source_type = ?2 GROUP BY status",
                params![d, st.as_str()],
            ),
        }
    }

    fn stats_query<P: duckdb::Params>(
        &self,
        sql: &str,
        query_params: P,
    ) -> std::result::Result<StatusCounts, String> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| format!("stats query failed: {e}"))?;
        let mut rows = stmt
            .query(query_params)
            .map_err(|e| format!("stats query failed: {e}"))?;

        let mut counts = StatusCounts::default();
        while let Some(row) = rows.next().map_err(|e| format!("row read failed: {e}"))? {
            let status: String = row.get(0).map_err(|e| format!("bad status column: {e}"))?;
            let count: i64 = row.get(1).map_err(|e| format!("bad count column: {e}"))?;
            if let Some(status) = ItemStatus::parse(&status) {
                counts.record(status, count as u64);
            }
        }
        Ok(counts)
    }
}

fn read_item(row: &duckdb::Row<'_>) -> std::result::Result<QueueItem, String> {
    let source_type: String = row.get(1).map_err(|e| format!("bad source_type: {e}"))?;
    let status: String = row.get(3).map_err(|e| format!("bad status: {e}"))?;
    Ok(QueueItem {
        id: row.get(0).map_err(|e| format!("bad id: {e}"))?,
        source_type: SourceType::parse(&source_type)
            .ok_or_else(|| format!("unknown source_type: {source_type}"))?,
        date: row.get(2).map_err(|e| format!("bad date: {e}"))?,
        status: ItemStatus::parse(&status).ok_or_else(|| format!("unknown status: {status}"))?,
        attempts: row.get(4).map_err(|e| format!("bad attempts: {e}"))?,
        last_attempt: row.get(5).map_err(|e| format!("bad last_attempt: {e}"))?,
        error_message: row.get(6).map_err(|e| format!("bad error_message: {e}"))?,
        metadata: row.get(7).map_err(|e| format!("bad metadata: {e}"))?,
    })
}
