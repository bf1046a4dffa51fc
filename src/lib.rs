//! LISTING SCRAPER
//! Crawls a paginated listing in rounds until every page is done, skipped or
//! no longer making progress. Filtered rows are snapshotted after every page.

mod error;
mod macros;
mod parse;

pub mod aggregate;
pub mod config;
pub mod filter;
pub mod process;
pub mod progress;
pub mod request;
pub mod row;
pub mod schedule;

pub use error::{Error, FetchError, Result};

pub const DEFAULT_WORKER_COUNT: usize = 5;
pub const MAX_WORKER_COUNT: usize = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const ALLOWED_PAGE_SIZES: [usize; 3] = [5, 10, 20];
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
pub const BASE_URL: &str = "https://imap.health.gov.tw/App_Prog/ListFood.aspx";
pub const SNAPSHOT_PATH: &str = "food_data_updated.temp.json";
pub const FINAL_PATH: &str = "food_data_updated.json";
