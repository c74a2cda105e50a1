//! Completeness audit: compares local queue state for each day against
//! the authoritative upstream totals and surfaces gaps.
//!
//! Decision order per (date, source): any work still pending/processing/
//! failed → INCOMPLETE (upstream is not consulted); no local rows → ask
//! upstream whether the day should have data; completed rows with nothing
//! in flight → OK. There is no equality check against upstream totals,
//! which drift by small amounts day to day.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::config::Settings;
use crate::error::Result;
use crate::fetch::Fetch;
use crate::harvester::{ContributionKind, HarvestType};
use crate::models::{ContributionsPage, QuestionsPage};
use crate::queue::{SourceType, StatusCounts, WorkQueue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayStatus {
    /// Items still pending/processing/failed locally.
    Incomplete {
        pending: u64,
        processing: u64,
        failed: u64,
        total: u64,
    },
    /// Upstream has records for the day but the queue has none.
    Missing { upstream_total: u64 },
    /// Upstream agrees the day is empty.
    EmptyOk,
    /// All local rows completed.
    Ok { completed: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAudit {
    pub date: String,
    pub source_type: SourceType,
    pub status: DayStatus,
}

pub struct Auditor {
    fetcher: Arc<dyn Fetch>,
    queue: Arc<WorkQueue>,
    hansard_base_url: String,
    pqs_base_url: String,
}

impl Auditor {
    pub fn new(fetcher: Arc<dyn Fetch>, queue: Arc<WorkQueue>, settings: &Settings) -> Self {
        Self {
            fetcher,
            queue,
            hansard_base_url: settings.hansard_base_url.clone(),
            pqs_base_url: settings.pqs_base_url.clone(),
        }
    }

    pub async fn audit_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        audit_type: HarvestType,
    ) -> Result<Vec<DayAudit>> {
        tracing::info!("auditing from {start} to {end}");
        let mut reports = Vec::new();

        let mut current = start;
        while current <= end {
            let date = current.format("%Y-%m-%d").to_string();
            if audit_type != HarvestType::Pqs {
                reports.push(self.check_day(&date, SourceType::Hansard).await?);
            }
            if audit_type != HarvestType::Hansard {
                reports.push(self.check_day(&date, SourceType::Pq).await?);
            }
            match current.succ_opt() {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(reports)
    }

    async fn check_day(&self, date: &str, source_type: SourceType) -> Result<DayAudit> {
        let stats = self.queue.get_daily_stats(date, Some(source_type)).await?;
        let status = self.day_status(date, source_type, &stats).await?;
        log_status(date, source_type, &status);
        Ok(DayAudit {
            date: date.to_string(),
            source_type,
            status,
        })
    }

    async fn day_status(
        &self,
        date: &str,
        source_type: SourceType,
        stats: &StatusCounts,
    ) -> Result<DayStatus> {
        if stats.pending > 0 || stats.processing > 0 || stats.failed > 0 {
            return Ok(DayStatus::Incomplete {
                pending: stats.pending,
                processing: stats.processing,
                failed: stats.failed,
                total: stats.total(),
            });
        }

        if stats.total() == 0 {
            let upstream_total = self.upstream_count(date, source_type).await;
            return Ok(if upstream_total > 0 {
                DayStatus::Missing { upstream_total }
            } else {
                DayStatus::EmptyOk
            });
        }

        Ok(DayStatus::Ok {
            completed: stats.completed,
        })
    }

    /// Authoritative record count for a day. Errors count as zero so a
    /// flaky upstream never turns a quiet day into a false MISSING.
    async fn upstream_count(&self, date: &str, source_type: SourceType) -> u64 {
        match source_type {
            SourceType::Hansard => {
                let mut total = 0;
                for kind in ContributionKind::ALL {
                    total += self.hansard_count(date, kind).await.unwrap_or_else(|e| {
                        tracing::warn!("failed to fetch hansard count for {date}: {e}");
                        0
                    });
                }
                total
            }
            SourceType::Pq => {
                let mut total = 0;
                for field in ["tabled", "answered"] {
                    total += self.pq_count(date, field).await.unwrap_or_else(|e| {
                        tracing::warn!("failed to fetch PQ count for {date}: {e}");
                        0
                    });
                }
                total
            }
        }
    }

    async fn hansard_count(&self, date: &str, kind: ContributionKind) -> Result<u64> {
        let url = format!(
            "{}/search/contributions/{}.json",
            self.hansard_base_url,
            kind.as_str()
        );
        let query = [
            ("startDate", date.to_string()),
            ("endDate", date.to_string()),
            ("take", "1".to_string()),
        ];
        let page: ContributionsPage = self.fetcher.get(&url, &query).await?.json()?;
        Ok(page.total_result_count)
    }

    async fn pq_count(&self, date: &str, field: &str) -> Result<u64> {
        let url = format!("{}/writtenquestions/questions", self.pqs_base_url);
        let from_param = format!("{field}WhenFrom");
        let to_param = format!("{field}WhenTo");
        let query = [
            (from_param.as_str(), date.to_string()),
            (to_param.as_str(), date.to_string()),
            ("take", "1".to_string()),
        ];
        let page: QuestionsPage = self.fetcher.get(&url, &query).await?.json()?;
        Ok(page.total_results)
    }
}

fn log_status(date: &str, source_type: SourceType, status: &DayStatus) {
    let prefix = format!("[{date}] [{}]", source_type.as_str().to_uppercase());
    match status {
        DayStatus::Incomplete {
            pending,
            processing,
            failed,
            total,
        } => tracing::warn!(
            "{prefix} INCOMPLETE: {pending} pending, {failed} failed, {processing} processing (total: {total})"
        ),
        DayStatus::Missing { upstream_total } => tracing::error!(
            "{prefix} MISSING: API reports {upstream_total} items but queue has 0 — run harvest"
        ),
        DayStatus::EmptyOk => tracing::debug!("{prefix} empty day, verified upstream"),
        DayStatus::Ok { completed } => tracing::debug!("{prefix} OK: {completed} items completed"),
    }
}
