use chrono::NaiveDate;

use crate::config::DateWindow;
use crate::row::Row;

/// Date formats a row or CLI date may use, tried in order.
pub const DATE_FORMATS: [&str; 3] = ["%Y.%m.%d", "%Y-%m-%d", "%Y/%m/%d"];

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// A page's rows after date filtering, with the date range observed on the whole page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilteredPage {
    pub rows: Vec<Row>,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
}

impl FilteredPage {
    /// `true` when even the newest row on the page predates the window.
    /// Pages are assumed to be sorted newest first, so every later page would too.
    pub fn is_before(&self, window: &DateWindow) -> bool {
        self.max_date.is_some_and(|d| d < window.start)
    }
}

/// Keeps rows dated inside `window`. Rows without a parsable date are dropped
/// and don't count towards the observed range.
pub fn filter_page(rows: Vec<Row>, window: &DateWindow) -> FilteredPage {
    let mut page = FilteredPage::default();
    for row in rows {
        let Some(date) = row.date().and_then(parse_date) else {
            continue;
        };
        page.min_date = Some(page.min_date.map_or(date, |d| d.min(date)));
        page.max_date = Some(page.max_date.map_or(date, |d| d.max(date)));
        if window.contains(date) {
            page.rows.push(row);
        }
    }
    page
}
