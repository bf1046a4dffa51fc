//! Round loop.
//!
//! Each round plans the pending pages, splits them across a fixed number of
//! workers by `(page - 1) % worker_count` and waits for all of them before
//! deciding whether another round is worth running. A page is owned by one
//! worker per round, so no page is ever fetched twice at the same time.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::{sync::Mutex, task::JoinSet};

use crate::aggregate::ResultAggregator;
use crate::config::CrawlConfig;
use crate::filter::{filter_page, FilteredPage};
use crate::info_time;
use crate::progress::{Attempt, ProgressTracker};
use crate::request::PageFetcher;
use crate::Result;

/// Why the round loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundsEnd {
    /// No page is left to attempt.
    Completed { rounds: usize },
    /// A round produced no new successful page while pages were still pending.
    Stalled { rounds: usize },
}

pub struct Scheduler<F> {
    fetcher: Arc<F>,
    config: Arc<CrawlConfig>,
    progress: Arc<Mutex<ProgressTracker>>,
    results: Arc<Mutex<ResultAggregator>>,
}

impl<F: PageFetcher + 'static> Scheduler<F> {
    pub fn new(
        fetcher: Arc<F>,
        config: Arc<CrawlConfig>,
        progress: Arc<Mutex<ProgressTracker>>,
        results: Arc<Mutex<ResultAggregator>>,
    ) -> Self {
        Self {
            fetcher,
            config,
            progress,
            results,
        }
    }

    /// Runs rounds until every page is settled or a round makes no progress.
    pub async fn run(&self) -> Result<RoundsEnd> {
        let mut rounds = 0;
        loop {
            let (pending, completed_before) = {
                let mut progress = self.progress.lock().await;
                let pending = progress.plan_round(self.config.max_retries);
                (pending, progress.success_count())
            };
            if pending.is_empty() {
                return Ok(RoundsEnd::Completed { rounds });
            }

            rounds += 1;
            let round_start = chrono::Local::now();
            info_time!("Round {rounds}: {} pages pending", pending.len());
            self.run_round(&pending).await?;

            let (completed_after, total_pages) = {
                let progress = self.progress.lock().await;
                (progress.success_count(), progress.total_pages())
            };
            info_time!(
                round_start,
                "Round {rounds} done: {completed_after}/{total_pages} pages completed"
            );

            if completed_after == completed_before {
                let excluded = self.progress.lock().await.settle_ceiling();
                tracing::warn!(
                    round = rounds,
                    excluded,
                    "no new pages completed this round, stopping"
                );
                return Ok(RoundsEnd::Stalled { rounds });
            }
        }
    }

    /// Spawns one task per worker with a non-empty assignment and joins them all.
    async fn run_round(&self, pending: &[usize]) -> Result<()> {
        let mut workers = JoinSet::new();
        for (worker_id, pages) in assign_pages(pending, self.config.worker_count)
            .into_iter()
            .enumerate()
        {
            if pages.is_empty() {
                continue;
            }
            let worker = Worker {
                id: worker_id,
                fetcher: self.fetcher.clone(),
                config: self.config.clone(),
                progress: self.progress.clone(),
                results: self.results.clone(),
            };
            workers.spawn(async move { worker.run(pages).await });
        }

        while let Some(task) = workers.join_next().await {
            task??;
        }
        Ok(())
    }
}

/// Splits `pages` into `worker_count` lists, page `p` going to worker `(p - 1) % worker_count`.
pub fn assign_pages(pages: &[usize], worker_count: usize) -> Vec<Vec<usize>> {
    let worker_count = worker_count.max(1);
    let mut assignments = vec![Vec::new(); worker_count];
    for &page in pages {
        assignments[(page - 1) % worker_count].push(page);
    }
    assignments
}

/// Outcome of the row-count check. `None` means the page counts as fetched.
fn check_row_count(page: usize, count: usize, page_size: usize, last_page: usize) -> Option<String> {
    if count == 0 {
        Some("no rows on page".into())
    } else if count == page_size || page == last_page {
        None
    } else {
        Some(format!("only {count} of {page_size} rows"))
    }
}

struct Worker<F> {
    id: usize,
    fetcher: Arc<F>,
    config: Arc<CrawlConfig>,
    progress: Arc<Mutex<ProgressTracker>>,
    results: Arc<Mutex<ResultAggregator>>,
}

impl<F: PageFetcher> Worker<F> {
    async fn run(self, pages: Vec<usize>) -> Result<()> {
        for page in pages {
            self.process_page(page).await?;
        }
        Ok(())
    }

    async fn process_page(&self, page: usize) -> Result<()> {
        let last_page = {
            let progress = self.progress.lock().await;
            if !progress.is_allowed(page) {
                tracing::debug!(worker = self.id, page, "page above ceiling, not started");
                return Ok(());
            }
            progress.total_pages()
        };

        let start = Instant::now();
        let fetched = self.fetcher.fetch_page(page, &self.config).await;
        let elapsed = start.elapsed();

        let window = &self.config.date_window;
        let (raw_count, filtered, error) = match fetched {
            Ok(rows) => {
                let raw_count = rows.len();
                let error = check_row_count(page, raw_count, self.config.page_size, last_page);
                (raw_count, filter_page(rows, window), error)
            }
            Err(e) => (0, FilteredPage::default(), Some(e.to_string())),
        };
        let success = error.is_none();

        let attempts = {
            let mut progress = self.progress.lock().await;
            progress.record(
                page,
                Attempt {
                    worker_id: self.id,
                    elapsed,
                    raw_count,
                    filtered_count: filtered.rows.len(),
                    min_date: filtered.min_date,
                    max_date: filtered.max_date,
                    error: error.clone(),
                },
            );
            if self.config.early_stop && filtered.is_before(window) && progress.lower_ceiling(page) {
                tracing::info!(
                    worker = self.id,
                    page,
                    max_page_allowed = progress.max_page_allowed(),
                    "page is older than the date window, lowering ceiling"
                );
            }
            progress.get(page).map_or(0, |state| state.attempts)
        };

        if success {
            let filtered_count = filtered.rows.len();
            self.results.lock().await.store(page, filtered.rows).await?;
            tracing::info!(
                worker = self.id,
                page,
                raw = raw_count,
                filtered = filtered_count,
                elapsed_secs = elapsed.as_secs_f64(),
                "page done"
            );
        } else {
            tracing::warn!(
                worker = self.id,
                page,
                attempts,
                error = error.as_deref().unwrap_or_default(),
                "page failed"
            );
        }
        Ok(())
    }
}
