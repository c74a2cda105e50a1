//! ID enumeration: pages the source search APIs for a date range and
//! enqueues one PENDING item per record. Enqueueing is idempotent (queue
//! primary key), so overlapping harvest windows are safe to re-run.

use std::sync::Arc;

use chrono::NaiveDate;
use futures_util::future::join_all;

use crate::config::Settings;
use crate::error::Result;
use crate::fetch::Fetch;
use crate::models::{ContributionsPage, QuestionsPage};
use crate::queue::{SourceType, WorkQueue};

const PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestType {
    All,
    Hansard,
    Pqs,
}

impl HarvestType {
    fn includes_hansard(&self) -> bool {
        matches!(self, Self::All | Self::Hansard)
    }

    fn includes_pqs(&self) -> bool {
        matches!(self, Self::All | Self::Pqs)
    }
}

/// The four Hansard contribution search streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContributionKind {
    Spoken,
    Written,
    Corrections,
    Petitions,
}

impl ContributionKind {
    pub const ALL: [ContributionKind; 4] = [
        Self::Spoken,
        Self::Written,
        Self::Corrections,
        Self::Petitions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spoken => "Spoken",
            Self::Written => "Written",
            Self::Corrections => "Corrections",
            Self::Petitions => "Petitions",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PqDateField {
    Tabled,
    Answered,
}

impl PqDateField {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Tabled => "tabled",
            Self::Answered => "answered",
        }
    }
}

pub struct Harvester {
    fetcher: Arc<dyn Fetch>,
    queue: Arc<WorkQueue>,
    hansard_base_url: String,
    pqs_base_url: String,
}

impl Harvester {
    pub fn new(fetcher: Arc<dyn Fetch>, queue: Arc<WorkQueue>, settings: &Settings) -> Self {
        Self {
            fetcher,
            queue,
            hansard_base_url: settings.hansard_base_url.clone(),
            pqs_base_url: settings.pqs_base_url.clone(),
        }
    }

    /// Enqueue every record id visible between `start` and `end`
    /// (inclusive). Streams for one day run concurrently; a failure in
    /// one stream aborts only that stream.
    pub async fn harvest_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        harvest_type: HarvestType,
    ) {
        let mut current = start;
        while current <= end {
            let date = current.format("%Y-%m-%d").to_string();
            tracing::info!("harvesting {date}");

            let hansard = async {
                if harvest_type.includes_hansard() {
                    join_all(
                        ContributionKind::ALL
                            .iter()
                            .map(|kind| self.harvest_hansard_day(&date, *kind)),
                    )
                    .await;
                }
            };
            let pqs = async {
                if harvest_type.includes_pqs() {
                    tokio::join!(
                        self.harvest_pqs_day(&date, PqDateField::Tabled),
                        self.harvest_pqs_day(&date, PqDateField::Answered),
                    );
                }
            };
            tokio::join!(hansard, pqs);

            match current.succ_opt() {
                Some(next) => current = next,
                None => break,
            }
        }
    }

    async fn harvest_hansard_day(&self, date: &str, kind: ContributionKind) {
        match self.try_harvest_hansard_day(date, kind).await {
            Ok(added) if added > 0 => {
                tracing::info!("enqueued {added} {} contributions for {date}", kind.as_str());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("error harvesting hansard {date} {}: {e}", kind.as_str());
            }
        }
    }

    async fn try_harvest_hansard_day(&self, date: &str, kind: ContributionKind) -> Result<usize> {
        let url = format!(
            "{}/search/contributions/{}.json",
            self.hansard_base_url,
            kind.as_str()
        );

        let mut skip = 0u64;
        let mut added = 0usize;
        loop {
            let query = [
                ("orderBy", "SittingDateAsc".to_string()),
                ("startDate", date.to_string()),
                ("endDate", date.to_string()),
                ("take", PAGE_SIZE.to_string()),
                ("skip", skip.to_string()),
            ];
            let page: ContributionsPage = self.fetcher.get(&url, &query).await?.json()?;
            if page.results.is_empty() {
                break;
            }

            for item in &page.results {
                let Some(item_id) = hansard_item_id(item) else {
                    tracing::warn!("skipping {} result without id on {date}", kind.as_str());
                    continue;
                };
                let queue_id = format!("hansard_{item_id}");
                let metadata = serde_json::json!({
                    "id": item_id,
                    "type": kind.as_str(),
                    "item_data": item,
                })
                .to_string();
                if self
                    .queue
                    .add_item(&queue_id, SourceType::Hansard, date, Some(metadata))
                    .await?
                {
                    added += 1;
                }
            }

            skip += PAGE_SIZE;
            if skip >= page.total_result_count {
                break;
            }
        }
        Ok(added)
    }

    async fn harvest_pqs_day(&self, date: &str, field: PqDateField) {
        match self.try_harvest_pqs_day(date, field).await {
            Ok(added) if added > 0 => {
                tracing::info!("enqueued {added} {} questions for {date}", field.as_str());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("error harvesting PQs {date} ({}): {e}", field.as_str());
            }
        }
    }

    async fn try_harvest_pqs_day(&self, date: &str, field: PqDateField) -> Result<usize> {
        let url = format!("{}/writtenquestions/questions", self.pqs_base_url);
        let from_param = format!("{}WhenFrom", field.as_str());
        let to_param = format!("{}WhenTo", field.as_str());

        let mut skip = 0u64;
        let mut added = 0usize;
        loop {
            let query = [
                (from_param.as_str(), date.to_string()),
                (to_param.as_str(), date.to_string()),
                ("take", PAGE_SIZE.to_string()),
                ("skip", skip.to_string()),
            ];
            let page: QuestionsPage = self.fetcher.get(&url, &query).await?.json()?;
            if page.results.is_empty() {
                break;
            }

            for item in &page.results {
                let Some(pq_id) = item.value.get("id").and_then(|v| v.as_i64()) else {
                    tracing::warn!("skipping question result without id on {date}");
                    continue;
                };
                let queue_id = format!("pq_{pq_id}");
                let metadata = serde_json::json!({
                    "id": pq_id,
                    "type": field.as_str(),
                })
                .to_string();
                if self
                    .queue
                    .add_item(&queue_id, SourceType::Pq, date, Some(metadata))
                    .await?
                {
                    added += 1;
                }
            }

            skip += PAGE_SIZE;
            if skip >= page.total_results {
                break;
            }
        }
        Ok(added)
    }
}

/// Hansard results are keyed by `ContributionExtId`, with the numeric
/// `Id` as a fallback for rows that lack one.
fn hansard_item_id(item: &serde_json::Value) -> Option<String> {
    item.get("ContributionExtId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| item.get("Id").and_then(|v| v.as_i64()).map(|id| id.to_string()))
}
