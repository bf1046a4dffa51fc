use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use listing_scrap::{
    config::{CrawlConfig, DateWindow},
    process::{process_site, OutputPaths, RunOutcome},
    progress::PageStatus,
    request::PageFetcher,
    row::Row,
    Error, FetchError,
};
use tempfile::TempDir;

type Response = Result<Vec<Row>, FetchError>;

/// Replays scripted responses per page. The last response repeats once a script runs out.
struct ScriptedFetcher {
    total_pages: Result<usize, FetchError>,
    scripts: HashMap<usize, Vec<Response>>,
    calls: Mutex<HashMap<usize, usize>>,
    total_calls: Mutex<usize>,
}

impl ScriptedFetcher {
    fn new(total_pages: usize) -> Self {
        Self {
            total_pages: Ok(total_pages),
            scripts: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            total_calls: Mutex::new(0),
        }
    }

    fn page(mut self, page: usize, responses: Vec<Response>) -> Self {
        self.scripts.insert(page, responses);
        self
    }

    fn calls(&self, page: usize) -> usize {
        self.calls.lock().unwrap().get(&page).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PageFetcher for &'static ScriptedFetcher {
    async fn total_pages(&self, _config: &CrawlConfig) -> Result<usize, FetchError> {
        *self.total_calls.lock().unwrap() += 1;
        self.total_pages.clone()
    }

    async fn fetch_page(&self, page: usize, _config: &CrawlConfig) -> Result<Vec<Row>, FetchError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(page).or_insert(0);
            *n += 1;
            *n
        };
        let script = self
            .scripts
            .get(&page)
            .ok_or_else(|| FetchError::Network(format!("no script for page {page}")))?;
        script
            .get(attempt - 1)
            .or_else(|| script.last())
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Parse("empty script".into())))
    }
}

fn leak(fetcher: ScriptedFetcher) -> &'static ScriptedFetcher {
    Box::leak(Box::new(fetcher))
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn november() -> DateWindow {
    DateWindow::new(day(2025, 11, 1), day(2025, 11, 30))
}

fn rows(tag: &str, dates: &[&str]) -> Vec<Row> {
    dates
        .iter()
        .enumerate()
        .map(|(i, date)| Row::new().with("name", format!("{tag}-{i}")).with("date", *date))
        .collect()
}

fn network_error() -> Response {
    Err(FetchError::Network("connection reset".into()))
}

fn paths(dir: &TempDir) -> OutputPaths {
    OutputPaths {
        snapshot: dir.path().join("snapshot.json"),
        final_output: dir.path().join("final.json"),
    }
}

fn read_rows(path: &Path) -> Vec<Row> {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn names(rows: &[Row]) -> Vec<&str> {
    rows.iter().filter_map(|r| r.get("name")).collect()
}

#[tokio::test]
async fn page_older_than_window_lowers_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = leak(
        ScriptedFetcher::new(3)
            .page(1, vec![Ok(rows("p1", &["2025.11.10", "2025.11.05"]))])
            .page(2, vec![Ok(rows("p2", &["2025.10.01"]))])
            .page(3, vec![Ok(rows("p3", &["2025.09.01", "2025.09.01"]))]),
    );
    let config = CrawlConfig::new(november())
        .with_page_size(2)
        .with_worker_count(1);

    let report = process_site(fetcher, config, paths(&dir)).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.max_page_allowed, 1);
    assert_eq!(report.unfinished, Vec::<usize>::new());
    assert_eq!(names(&report.rows), ["p1-0", "p1-1"]);
    assert_eq!(read_rows(&dir.path().join("final.json")), report.rows);

    assert_eq!(fetcher.calls(3), 0);
    let status: Vec<_> = report.pages.iter().map(|p| p.status).collect();
    assert_eq!(
        status,
        [PageStatus::Success, PageStatus::SkippedDate, PageStatus::SkippedDate]
    );
    assert_eq!(report.pages[0].filtered_count, 2);
}

#[tokio::test]
async fn page_failing_every_attempt_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut fetcher = ScriptedFetcher::new(6).page(6, vec![network_error()]);
    // Page k only comes through on attempt k, so each round completes one new page.
    for page in 1..=5 {
        let mut script: Vec<Response> = (1..page).map(|_| network_error()).collect();
        script.push(Ok(rows(&format!("p{page}"), &["2025.11.20"; 20])));
        fetcher = fetcher.page(page, script);
    }
    let fetcher = leak(fetcher);
    let config = CrawlConfig::new(november())
        .with_worker_count(1)
        .with_max_retries(5);

    let report = process_site(fetcher, config, paths(&dir)).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.unfinished, vec![6]);
    let six = &report.pages[5];
    assert_eq!(six.status, PageStatus::Skipped);
    assert_eq!(six.attempts, 5);
    assert_eq!(six.last_error.as_deref(), Some("network error: connection reset"));
    assert_eq!(fetcher.calls(6), 5);

    assert_eq!(report.row_count, 100);
    assert_eq!(read_rows(&dir.path().join("final.json")).len(), 100);
}

#[tokio::test]
async fn round_without_progress_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = leak(
        ScriptedFetcher::new(2)
            .page(1, vec![network_error()])
            .page(2, vec![Ok(rows("p2", &["2025.11.02"]))]),
    );
    let config = CrawlConfig::new(november()).with_worker_count(2);

    let report = process_site(fetcher, config, paths(&dir)).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Stalled);
    assert_eq!(report.rounds, 2);
    assert_eq!(report.unfinished, vec![1]);
    let one = &report.pages[0];
    assert_eq!(one.status, PageStatus::Failed);
    assert_eq!(one.attempts, 2);
    assert_eq!(fetcher.calls(1), 2);
    assert_eq!(names(&read_rows(&dir.path().join("final.json"))), ["p2-0"]);
}

#[tokio::test]
async fn stalled_run_skips_pages_above_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = leak(
        ScriptedFetcher::new(3)
            .page(1, vec![network_error()])
            .page(2, vec![Ok(rows("p2", &["2025.10.01"]))])
            .page(3, vec![Ok(rows("p3", &["2025.11.10", "2025.11.09"]))]),
    );
    let config = CrawlConfig::new(november())
        .with_page_size(2)
        .with_worker_count(1);

    let report = process_site(fetcher, config, paths(&dir)).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Stalled);
    assert_eq!(report.rounds, 1);
    assert_eq!(report.max_page_allowed, 1);
    assert_eq!(fetcher.calls(3), 0);
    let status: Vec<_> = report.pages.iter().map(|p| p.status).collect();
    assert_eq!(
        status,
        [PageStatus::Failed, PageStatus::SkippedDate, PageStatus::SkippedDate]
    );
    assert_eq!(report.unfinished, vec![1]);
    assert!(read_rows(&dir.path().join("final.json")).is_empty());
}

#[tokio::test]
async fn reversed_window_fails_fast_with_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = leak(ScriptedFetcher::new(3).page(1, vec![Ok(rows("p1", &["2025.11.10"]))]));
    let config = CrawlConfig::new(DateWindow::new(day(2025, 11, 30), day(2025, 11, 1)));

    let err = process_site(fetcher, config, paths(&dir)).await.unwrap_err();

    assert!(matches!(err, Error::InvalidDateWindow { .. }));
    assert!(read_rows(&dir.path().join("final.json")).is_empty());
    assert_eq!(*fetcher.total_calls.lock().unwrap(), 0);
    assert_eq!(fetcher.calls(1), 0);
}

#[tokio::test]
async fn flaky_pages_all_end_up_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let full = |tag: &str| Ok(rows(tag, &["2025.11.15", "2025.12.01"]));
    let fetcher = leak(
        ScriptedFetcher::new(4)
            .page(1, vec![full("p1")])
            .page(2, vec![network_error(), full("p2")])
            .page(3, vec![Err(FetchError::Timeout("30s".into())), full("p3")])
            .page(4, vec![Ok(rows("p4", &["2025.11.03"]))]),
    );
    let config = CrawlConfig::new(november())
        .with_worker_count(2)
        .with_page_size(2);
    let paths = paths(&dir);
    let snapshot = paths.snapshot.clone();

    let report = process_site(fetcher, config, paths).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.rounds, 2);
    assert!(report.unfinished.is_empty());
    assert!(report.pages.iter().all(|p| p.status == PageStatus::Success));
    // Rows dated after the window are dropped, the rest keep page order.
    assert_eq!(names(&report.rows), ["p1-0", "p2-0", "p3-0", "p4-0"]);
    assert_eq!(read_rows(&snapshot), report.rows);
}

#[tokio::test]
async fn no_pages_writes_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut fetcher = ScriptedFetcher::new(0);
    fetcher.total_pages = Err(FetchError::Timeout("30s".into()));
    let fetcher = leak(fetcher);

    let report = process_site(fetcher, CrawlConfig::new(november()), paths(&dir))
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::NoPages);
    assert!(report.unfinished.is_empty());
    assert!(read_rows(&dir.path().join("final.json")).is_empty());
    assert!(read_rows(&dir.path().join("snapshot.json")).is_empty());
}

#[tokio::test]
async fn early_stop_can_be_turned_off() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = leak(
        ScriptedFetcher::new(3)
            .page(1, vec![Ok(rows("p1", &["2025.11.10"; 5]))])
            .page(2, vec![Ok(rows("p2", &["2025.10.01"; 5]))])
            .page(3, vec![Ok(rows("p3", &["2025.11.04"]))]),
    );
    let config = CrawlConfig::new(november())
        .with_page_size(5)
        .with_worker_count(1)
        .with_early_stop(false);

    let report = process_site(fetcher, config, paths(&dir)).await.unwrap();

    assert_eq!(report.max_page_allowed, 3);
    assert!(report.unfinished.is_empty());
    assert_eq!(report.rows.len(), 6);
    assert_eq!(report.rows.last().and_then(|r| r.get("name")), Some("p3-0"));
}
