use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::aggregate::ResultAggregator;
use crate::config::CrawlConfig;
use crate::progress::{PageState, ProgressTracker};
use crate::request::PageFetcher;
use crate::row::Row;
use crate::schedule::{RoundsEnd, Scheduler};
use crate::{info_time, Result, FINAL_PATH, SNAPSHOT_PATH};

/// Where the snapshot and the final artifact are written.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub snapshot: PathBuf,
    pub final_output: PathBuf,
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            snapshot: SNAPSHOT_PATH.into(),
            final_output: FINAL_PATH.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every page succeeded or was skipped.
    Completed,
    /// Stopped early because a round made no progress.
    Stalled,
    /// The listing had no pages, or the page count couldn't be fetched.
    NoPages,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub generated_at: DateTime<Local>,
    pub config: CrawlConfig,
    pub outcome: RunOutcome,
    pub rounds: usize,
    pub total_pages: usize,
    pub max_page_allowed: usize,
    pub row_count: usize,
    pub unfinished: Vec<usize>,
    pub pages: Vec<PageState>,
    #[serde(skip)]
    pub rows: Vec<Row>,
}

impl CrawlReport {
    fn empty(config: CrawlConfig) -> Self {
        Self {
            generated_at: Local::now(),
            config,
            outcome: RunOutcome::NoPages,
            rounds: 0,
            total_pages: 0,
            max_page_allowed: 0,
            row_count: 0,
            unfinished: Vec::new(),
            pages: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Number of rows per value of `field`, most common first.
    pub fn count_by(&self, field: &str) -> Vec<(String, usize)> {
        let mut counts = BTreeMap::<&str, usize>::new();
        for row in &self.rows {
            *counts.entry(row.get(field).unwrap_or_default()).or_default() += 1;
        }
        let mut counts: Vec<_> = counts
            .into_iter()
            .map(|(value, n)| (value.to_owned(), n))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts
    }
}

/// Crawls the whole listing and writes the final artifact.
///
/// Invalid configs still get an empty final artifact before the error is returned.
/// Pages that couldn't be fetched are reported in `CrawlReport::unfinished`, not as errors.
pub async fn process_site<F>(fetcher: F, config: CrawlConfig, paths: OutputPaths) -> Result<CrawlReport>
where
    F: PageFetcher + 'static,
{
    let start_time = Local::now();
    let results = ResultAggregator::new(paths.snapshot, paths.final_output);

    if let Err(e) = config.validate() {
        tracing::error!("invalid configuration: {e}");
        results.finalize().await?;
        return Err(e);
    }

    info_time!(
        "Started scraping {} to {}, {} rows per page",
        config.date_window.start,
        config.date_window.end,
        config.page_size
    );
    results.snapshot().await?;

    let total_pages = match fetcher.total_pages(&config).await {
        Ok(total) => total,
        Err(e) => {
            tracing::warn!("couldn't detect the number of pages: {e}");
            0
        }
    };
    if total_pages == 0 {
        info_time!("No pages to scrape in the date window");
        results.finalize().await?;
        return Ok(CrawlReport::empty(config));
    }
    info_time!("Detected {total_pages} pages");

    let config = Arc::new(config);
    let progress = Arc::new(Mutex::new(ProgressTracker::new(total_pages)));
    let results = Arc::new(Mutex::new(results));

    let scheduler = Scheduler::new(
        Arc::new(fetcher),
        config.clone(),
        progress.clone(),
        results.clone(),
    );
    let rounds_end = scheduler.run().await?;
    info_time!(start_time, "Finished PROCESSING ALL pages.");

    let local_now = Local::now();
    let rows = {
        let results = results.lock().await;
        let rows = results.finalize().await?;
        info_time!(
            local_now,
            "Wrote {} rows from {} pages to the final file",
            results.row_count(),
            results.page_count()
        );
        rows
    };

    let progress = progress.lock().await;
    let (outcome, rounds) = match rounds_end {
        RoundsEnd::Completed { rounds } => (RunOutcome::Completed, rounds),
        RoundsEnd::Stalled { rounds } => (RunOutcome::Stalled, rounds),
    };
    let unfinished = progress.unfinished();
    if !unfinished.is_empty() {
        tracing::warn!(count = unfinished.len(), ?unfinished, "pages left unfinished");
    }

    Ok(CrawlReport {
        generated_at: Local::now(),
        config: config.as_ref().clone(),
        outcome,
        rounds,
        total_pages,
        max_page_allowed: progress.max_page_allowed(),
        row_count: rows.len(),
        unfinished,
        pages: progress.pages().cloned().collect(),
        rows,
    })
}
