use scraper::{ElementRef, Html, Selector};
use tokio::task::spawn_blocking;

use crate::row::{Row, DATE_FIELD};
use crate::{Error, Result};

const TOTAL_PAGES_SELECTOR: &str = "span#ContentPlaceHolder1_ContentPlaceHolder2_ContentPlaceHolder2_PageControl1_ucPagingControl1_uLblTotalPageNum";

/// `<p>` prefixes on a listing entry and the fields they fill.
const PARAGRAPH_FIELDS: [(&str, &str); 3] = [
    ("地址：", "address"),
    ("電話：", "phone"),
    ("登錄字號：", "registration_id"),
];

/// Parses a listing page off the runtime, returning one `Row` per entry.
pub(crate) async fn parse_listing(html: String) -> Result<Vec<Row>> {
    spawn_blocking(move || parse_listing_html(&html)).await?
}

/// Extracts every `div.list-item` on the page.
/// Every row gets all fields, missing ones are left empty.
fn parse_listing_html(html: &str) -> Result<Vec<Row>> {
    let doc = Html::parse_document(html);

    let item_selector = create_selector("div.list-item")?;
    let name_selector = create_selector("div.list-title a")?;
    let paragraph_selector = create_selector("p")?;
    let status_selector = create_selector("div.mark span.text")?;
    let date_selector = create_selector("div.mark span.date")?;

    let mut rows = Vec::with_capacity(20);
    for item in doc.select(&item_selector) {
        let mut row = Row::new().with(
            "name",
            first_text(item, &name_selector).unwrap_or_default(),
        );

        let paragraphs: Vec<String> = item.select(&paragraph_selector).map(text_of).collect();
        for (prefix, field) in PARAGRAPH_FIELDS {
            let value = paragraphs
                .iter()
                .find_map(|p| p.strip_prefix(prefix))
                .unwrap_or_default();
            row.insert(field, value);
        }

        row.insert("status", first_text(item, &status_selector).unwrap_or_default());
        row.insert(DATE_FIELD, first_text(item, &date_selector).unwrap_or_default());
        rows.push(row);
    }
    Ok(rows)
}

/// Reads the total page count from the pager. Missing or garbled counts are 0.
pub(crate) fn parse_total_pages(html: &str) -> Result<usize> {
    let doc = Html::parse_document(html);
    let selector = create_selector(TOTAL_PAGES_SELECTOR)?;

    let total: usize = doc
        .select(&selector)
        .next()
        .map(text_of)
        .and_then(|t| t.replace(',', "").parse().ok())
        .unwrap_or(0);
    Ok(total)
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseMissingSelector(sel_str.into()))
}

#[inline]
fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_owned()
}

fn first_text(el: ElementRef<'_>, selector: &Selector) -> Option<String> {
    el.select(selector).next().map(text_of)
}
