use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};

use crate::config::CrawlConfig;
use crate::parse::{parse_listing, parse_total_pages};
use crate::row::Row;
use crate::{FetchError, Result, REQUEST_TIMEOUT_SECS};

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Source of listing pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Total number of pages for the configured query. `0` means nothing to crawl.
    async fn total_pages(&self, config: &CrawlConfig) -> core::result::Result<usize, FetchError>;

    /// Fetches page `page` (1-based) and returns its raw rows.
    async fn fetch_page(
        &self,
        page: usize,
        config: &CrawlConfig,
    ) -> core::result::Result<Vec<Row>, FetchError>;
}

/// `PageFetcher` backed by the HTML listing endpoint.
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .default_headers(header::HeaderMap::from_iter([(
                header::USER_AGENT,
                header::HeaderValue::from_static(USER_AGENT),
            )]))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn page_request(&self, page: usize, config: &CrawlConfig) -> RequestBuilder {
        let window = config.date_window;
        self.client.get(&self.base_url).query(&[
            ("page", page.to_string()),
            ("size", config.page_size.to_string()),
            ("ftype", "B".to_owned()),
            ("ds", window.start.format("%Y%m%d").to_string()),
            ("de", window.end.format("%Y%m%d").to_string()),
        ])
    }

    /// Requests a page and returns the HTML.
    async fn request_page_html(
        &self,
        page: usize,
        config: &CrawlConfig,
    ) -> core::result::Result<String, FetchError> {
        let res = self
            .page_request(page, config)
            .send()
            .await?
            .error_for_status()?;
        let html = res.text().await?;
        Ok(html)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn total_pages(&self, config: &CrawlConfig) -> core::result::Result<usize, FetchError> {
        let html = self.request_page_html(1, config).await?;
        parse_total_pages(&html).map_err(|e| FetchError::Parse(e.to_string()))
    }

    async fn fetch_page(
        &self,
        page: usize,
        config: &CrawlConfig,
    ) -> core::result::Result<Vec<Row>, FetchError> {
        let html = self.request_page_html(page, config).await?;
        parse_listing(html)
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))
    }
}
