use chrono::NaiveDate;
use serde::Serialize;

use crate::filter::parse_date;
use crate::{
    Error, Result, ALLOWED_PAGE_SIZES, DEFAULT_MAX_RETRIES, DEFAULT_PAGE_SIZE,
    DEFAULT_WORKER_COUNT, MAX_WORKER_COUNT,
};

/// Inclusive `[start, end]` range a row's date has to fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Settings for one run. Never changes once the run has started.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlConfig {
    pub date_window: DateWindow,
    pub worker_count: usize,
    pub max_retries: u32,
    pub page_size: usize,
    /// Lower the page ceiling once a page is entirely older than the window.
    /// Only correct if the listing is sorted newest first.
    pub early_stop: bool,
}

impl CrawlConfig {
    pub fn new(date_window: DateWindow) -> Self {
        Self {
            date_window,
            worker_count: DEFAULT_WORKER_COUNT,
            max_retries: DEFAULT_MAX_RETRIES,
            page_size: DEFAULT_PAGE_SIZE,
            early_stop: true,
        }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_early_stop(mut self, early_stop: bool) -> Self {
        self.early_stop = early_stop;
        self
    }

    /// Checks the invariants a run relies on. Page size and worker count
    /// ranges are enforced where the values are read, see [`check_page_size`].
    pub fn validate(&self) -> Result<()> {
        let DateWindow { start, end } = self.date_window;
        if end < start {
            return Err(Error::InvalidDateWindow { start, end });
        }
        if self.page_size == 0 {
            return Err(Error::InvalidPageSize(self.page_size));
        }
        if self.worker_count == 0 {
            return Err(Error::InvalidWorkerCount(self.worker_count));
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidMaxRetries);
        }
        Ok(())
    }
}

/// The listing only serves 5, 10 or 20 rows per page.
pub fn check_page_size(page_size: usize) -> Result<usize> {
    if ALLOWED_PAGE_SIZES.contains(&page_size) {
        Ok(page_size)
    } else {
        Err(Error::InvalidPageSize(page_size))
    }
}

pub fn check_worker_count(worker_count: usize) -> Result<usize> {
    if (1..=MAX_WORKER_COUNT).contains(&worker_count) {
        Ok(worker_count)
    } else {
        Err(Error::InvalidWorkerCount(worker_count))
    }
}

/// Parses a date given on the command line.
pub fn parse_cli_date(value: &str) -> Result<NaiveDate> {
    parse_date(value).ok_or_else(|| Error::InvalidDate(value.into()))
}
