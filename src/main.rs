use std::num::ParseIntError;
use std::path::PathBuf;

use chrono::{Days, Local};
use clap::Parser;
use listing_scrap::{
    aggregate::{write_atomic, write_csv_atomic},
    config::{check_page_size, check_worker_count, parse_cli_date, CrawlConfig, DateWindow},
    info_time,
    process::{process_site, OutputPaths},
    request::HttpFetcher,
    Result, BASE_URL, DEFAULT_MAX_RETRIES, DEFAULT_PAGE_SIZE, DEFAULT_WORKER_COUNT, FINAL_PATH,
    SNAPSHOT_PATH,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Scrapes a paginated listing, keeping rows inside a date window", long_about = None)]
struct Args {
    /// First day to keep (YYYY-MM-DD). Defaults to yesterday.
    #[arg(long)]
    start_date: Option<String>,

    /// Last day to keep (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    end_date: Option<String>,

    /// Rows per page: 5, 10 or 20.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, value_parser = page_size_arg)]
    page_size: usize,

    /// Parallel workers, 1 to 10.
    #[arg(long, default_value_t = DEFAULT_WORKER_COUNT, value_parser = worker_count_arg)]
    workers: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Keep crawling pages even after one is entirely older than the window.
    #[arg(long)]
    no_early_stop: bool,

    #[arg(long, default_value = BASE_URL)]
    base_url: String,

    #[arg(long, default_value = SNAPSHOT_PATH)]
    snapshot: PathBuf,

    #[arg(short, long, default_value = FINAL_PATH)]
    output: PathBuf,

    /// Also write the per-page progress report here.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Also write the final rows as CSV here.
    #[arg(long)]
    csv: Option<PathBuf>,
}

fn page_size_arg(s: &str) -> core::result::Result<usize, String> {
    let n = s.parse().map_err(|e: ParseIntError| e.to_string())?;
    check_page_size(n).map_err(|e| e.to_string())
}

fn worker_count_arg(s: &str) -> core::result::Result<usize, String> {
    let n = s.parse().map_err(|e: ParseIntError| e.to_string())?;
    check_worker_count(n).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let start_time = Local::now();

    let today = start_time.date_naive();
    let start = match &args.start_date {
        Some(s) => parse_cli_date(s)?,
        None => today.checked_sub_days(Days::new(1)).unwrap_or(today),
    };
    let end = match &args.end_date {
        Some(s) => parse_cli_date(s)?,
        None => today,
    };

    let config = CrawlConfig::new(DateWindow::new(start, end))
        .with_page_size(args.page_size)
        .with_worker_count(args.workers)
        .with_max_retries(args.max_retries)
        .with_early_stop(!args.no_early_stop);
    let paths = OutputPaths {
        snapshot: args.snapshot,
        final_output: args.output.clone(),
    };

    let report = match process_site(HttpFetcher::new(args.base_url)?, config, paths).await {
        Ok(report) => report,
        Err(e) if e.is_config() => {
            tracing::error!("Nothing scraped, fix the arguments and run again: {e}");
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    info_time!("Scraped {} rows in total", report.row_count);
    if !report.unfinished.is_empty() {
        let pages: Vec<String> = report.unfinished.iter().map(usize::to_string).collect();
        tracing::warn!("{} pages unfinished: {}", pages.len(), pages.join(", "));
    }
    for (i, row) in report.rows.iter().take(5).enumerate() {
        let fields: Vec<String> = row.fields().map(|(k, v)| format!("{k}: {v}")).collect();
        info_time!("{}. {}", i + 1, fields.join(" | "));
    }
    for (status, count) in report.count_by("status") {
        info_time!("{status}: {count} rows");
    }

    if let Some(path) = &args.report {
        write_atomic(path, &report).await?;
        info_time!("Wrote the progress report to {}", path.display());
    }
    if let Some(path) = &args.csv {
        if report.rows.is_empty() {
            info_time!("No rows, skipping the CSV export");
        } else {
            write_csv_atomic(path, &report.rows).await?;
            info_time!("Wrote {} rows as CSV to {}", report.rows.len(), path.display());
        }
    }
    info_time!(start_time, "Full program time, results in {}", args.output.display());

    Ok(())
}
