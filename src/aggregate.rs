use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::{fs::File, io::AsyncWriteExt};

use crate::row::Row;
use crate::{Error, Result};

/// Filtered rows of every successful page, keyed by page index.
/// Every change is followed by an atomic snapshot write.
#[derive(Debug)]
pub struct ResultAggregator {
    pages: BTreeMap<usize, Vec<Row>>,
    snapshot_path: PathBuf,
    final_path: PathBuf,
}

impl ResultAggregator {
    pub fn new(snapshot_path: impl Into<PathBuf>, final_path: impl Into<PathBuf>) -> Self {
        Self {
            pages: BTreeMap::new(),
            snapshot_path: snapshot_path.into(),
            final_path: final_path.into(),
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn row_count(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }

    /// All stored rows, ascending by page index.
    pub fn flatten(&self) -> Vec<Row> {
        self.pages.values().flatten().cloned().collect()
    }

    /// Stores a page's rows and snapshots. A page is only ever stored once.
    pub async fn store(&mut self, page: usize, rows: Vec<Row>) -> Result<()> {
        self.pages.entry(page).or_insert(rows);
        self.snapshot().await
    }

    pub async fn snapshot(&self) -> Result<()> {
        write_atomic(&self.snapshot_path, &self.flatten()).await
    }

    /// Writes the final artifact and returns what was written.
    pub async fn finalize(&self) -> Result<Vec<Row>> {
        let rows = self.flatten();
        write_atomic(&self.final_path, &rows).await?;
        Ok(rows)
    }
}

/// UTF-8 byte order mark, so spreadsheet tools read the CSV as UTF-8.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Serializes `value` as pretty JSON and writes it with [`write_bytes_atomic`].
pub async fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &bytes).await
}

/// Writes `rows` as BOM-prefixed CSV with [`write_bytes_atomic`].
/// Columns follow the first row's field order, no rows means no header either.
pub async fn write_csv_atomic(path: &Path, rows: &[Row]) -> Result<()> {
    let header: Vec<&str> = rows
        .first()
        .map(|row| row.fields().map(|(field, _)| field).collect())
        .unwrap_or_default();

    let mut writer = csv::Writer::from_writer(UTF8_BOM.to_vec());
    if !header.is_empty() {
        writer.write_record(&header)?;
        for row in rows {
            writer.write_record(header.iter().map(|field| row.get(field).unwrap_or_default()))?;
        }
    }
    let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    write_bytes_atomic(path, &bytes).await
}

/// Writes `bytes` into `<path>.tmp`, syncs it, then renames it over `path`.
/// Readers of `path` see either the old or the new content, never a partial write.
pub async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = tmp_path(path);
    let mut file = File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
