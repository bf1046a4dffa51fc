use chrono::NaiveDate;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("End date {end} is before start date {start}.")]
    InvalidDateWindow { start: NaiveDate, end: NaiveDate },
    #[error("Invalid page size {0}, use 5, 10 or 20.")]
    InvalidPageSize(usize),
    #[error("Invalid worker count {0}, use 1 to 10.")]
    InvalidWorkerCount(usize),
    #[error("Max retries has to be at least 1.")]
    InvalidMaxRetries,
    #[error("Couldn't parse date: {0}. Use YYYY-MM-DD.")]
    InvalidDate(String),

    #[error("The selector you are trying to scrape for is missing. Selector: {0}")]
    ParseMissingSelector(String),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Csv Error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl Error {
    /// `true` for errors raised by `CrawlConfig::validate` or CLI date parsing.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::InvalidDateWindow { .. }
                | Error::InvalidPageSize(_)
                | Error::InvalidWorkerCount(_)
                | Error::InvalidMaxRetries
                | Error::InvalidDate(_)
        )
    }
}

/// Failure of a single page fetch. Never fatal, it ends up in the page's `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("unreadable page: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            FetchError::Timeout(value.to_string())
        } else {
            FetchError::Network(value.to_string())
        }
    }
}
