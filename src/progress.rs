//! Per-page bookkeeping for a run.
//!
//! The tracker owns every page's [`PageState`] and the page ceiling. It lives
//! behind one lock shared by all workers, and every mutation goes through
//! [`ProgressTracker::update`], which refuses to touch pages that already
//! reached a terminal status.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;

pub const REASON_BEFORE_WINDOW: &str = "before date window";
pub const REASON_MAX_RETRIES: &str = "max retries reached";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Pending,
    Success,
    Failed,
    Skipped,
    SkippedDate,
}

impl PageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PageStatus::Success | PageStatus::Skipped | PageStatus::SkippedDate
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageState {
    pub index: usize,
    pub status: PageStatus,
    pub attempts: u32,
    pub worker_id: Option<usize>,
    pub last_elapsed_secs: Option<f64>,
    pub last_update: Option<DateTime<Local>>,
    pub raw_count: usize,
    pub filtered_count: usize,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    pub last_error: Option<String>,
}

impl PageState {
    fn new(index: usize) -> Self {
        Self {
            index,
            status: PageStatus::Pending,
            attempts: 0,
            worker_id: None,
            last_elapsed_secs: None,
            last_update: None,
            raw_count: 0,
            filtered_count: 0,
            min_date: None,
            max_date: None,
            last_error: None,
        }
    }
}

/// What a worker observed on one attempt at a page.
#[derive(Debug, Clone, Default)]
pub struct Attempt {
    pub worker_id: usize,
    pub elapsed: Duration,
    pub raw_count: usize,
    pub filtered_count: usize,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    /// `None` marks the attempt successful.
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct ProgressTracker {
    pages: BTreeMap<usize, PageState>,
    total_pages: usize,
    max_page_allowed: usize,
}

impl ProgressTracker {
    /// All pages in `1..=total_pages` start out pending.
    pub fn new(total_pages: usize) -> Self {
        Self {
            pages: (1..=total_pages).map(|p| (p, PageState::new(p))).collect(),
            total_pages,
            max_page_allowed: total_pages,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn max_page_allowed(&self) -> usize {
        self.max_page_allowed
    }

    pub fn is_allowed(&self, page: usize) -> bool {
        page <= self.max_page_allowed
    }

    pub fn get(&self, page: usize) -> Option<&PageState> {
        self.pages.get(&page)
    }

    pub fn pages(&self) -> impl Iterator<Item = &PageState> {
        self.pages.values()
    }

    /// Applies `f` to a page's state and stamps it. Terminal pages are left untouched.
    /// Returns the page's status afterwards, `None` for unknown pages.
    pub fn update(&mut self, page: usize, f: impl FnOnce(&mut PageState)) -> Option<PageStatus> {
        let entry = self.pages.get_mut(&page)?;
        if !entry.status.is_terminal() {
            f(entry);
            entry.last_update = Some(Local::now());
        }
        Some(entry.status)
    }

    /// Records one attempt at `page`, moving it to `Success` or `Failed`.
    pub fn record(&mut self, page: usize, attempt: Attempt) -> Option<PageStatus> {
        self.update(page, |entry| {
            entry.attempts += 1;
            entry.worker_id = Some(attempt.worker_id);
            entry.last_elapsed_secs = Some(attempt.elapsed.as_secs_f64());
            entry.raw_count = attempt.raw_count;
            entry.filtered_count = attempt.filtered_count;
            if attempt.min_date.is_some() {
                entry.min_date = attempt.min_date;
                entry.max_date = attempt.max_date;
            }
            match attempt.error {
                None => {
                    entry.status = PageStatus::Success;
                    entry.last_error = None;
                }
                Some(err) => {
                    entry.status = PageStatus::Failed;
                    entry.last_error = Some(err);
                }
            }
        })
    }

    /// Lowers the ceiling to `page - 1` unless it's already lower.
    /// Returns `true` if the ceiling moved.
    pub fn lower_ceiling(&mut self, page: usize) -> bool {
        let new_limit = self.max_page_allowed.min(page.saturating_sub(1));
        let lowered = new_limit < self.max_page_allowed;
        self.max_page_allowed = new_limit;
        lowered
    }

    /// Marks every unsettled page above the ceiling `SkippedDate`.
    /// Returns how many pages were settled.
    pub fn settle_ceiling(&mut self) -> usize {
        let excluded: Vec<usize> = self
            .pages
            .values()
            .filter(|s| !s.status.is_terminal() && !self.is_allowed(s.index))
            .map(|s| s.index)
            .collect();
        for &page in &excluded {
            self.update(page, |entry| {
                entry.status = PageStatus::SkippedDate;
                entry.last_error = Some(REASON_BEFORE_WINDOW.into());
            });
        }
        excluded.len()
    }

    /// Settles pages that won't be attempted again and returns the rest, ascending.
    ///
    /// Pages above the ceiling become `SkippedDate`, pages out of attempts
    /// become `Skipped` and keep their last error.
    pub fn plan_round(&mut self, max_retries: u32) -> Vec<usize> {
        self.settle_ceiling();
        let candidates: Vec<(usize, u32)> = self
            .pages
            .values()
            .filter(|s| !s.status.is_terminal())
            .map(|s| (s.index, s.attempts))
            .collect();

        let mut pending = Vec::with_capacity(candidates.len());
        for (page, attempts) in candidates {
            if attempts >= max_retries {
                self.update(page, |entry| {
                    entry.status = PageStatus::Skipped;
                    if entry.last_error.is_none() {
                        entry.last_error = Some(REASON_MAX_RETRIES.into());
                    }
                });
            } else {
                pending.push(page);
            }
        }
        pending
    }

    pub fn success_count(&self) -> usize {
        self.pages
            .values()
            .filter(|s| s.status == PageStatus::Success)
            .count()
    }

    /// Pages that didn't succeed and weren't excluded by the ceiling.
    pub fn unfinished(&self) -> Vec<usize> {
        self.pages
            .values()
            .filter(|s| !matches!(s.status, PageStatus::Success | PageStatus::SkippedDate))
            .map(|s| s.index)
            .collect()
    }
}
