//! The logical spreadsheet operations (§6.3) and the in-process backends this
//! crate ships.
//!
//! The concrete wire protocol against a spreadsheet API is an external
//! collaborator, out of scope for this crate (§1). `SheetsBackend` pins down
//! only the operations the writer needs; [`CsvSheetsBackend`] is used by tests
//! and local runs, [`NoopSheetsBackend`] backs `--dry-run`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::CrawlError;

#[async_trait]
pub trait SheetsBackend: Send + Sync {
    async fn ensure_tab(&self, name: &str, header_row: &[&str]) -> Result<(), CrawlError>;
    async fn ensure_hidden_tab(&self, name: &str, header_row: &[&str]) -> Result<(), CrawlError>;
    async fn append_rows(&self, tab: &str, rows: &[Vec<String>]) -> Result<(), CrawlError>;
    async fn read_column(&self, tab: &str, letter: &str) -> Result<Vec<String>, CrawlError>;
    async fn rewrite_tab(&self, tab: &str, rows: &[Vec<String>]) -> Result<(), CrawlError>;
}

/// Column letter ("A", "B", ..., "Z") to zero-based index. Only single-letter
/// columns are needed by this crate's tab contracts.
fn column_index(letter: &str) -> usize {
    letter
        .chars()
        .next()
        .map(|c| (c.to_ascii_uppercase() as usize).saturating_sub('A' as usize))
        .unwrap_or(0)
}

struct Tab {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// A local CSV-file-backed mock of a spreadsheet, one file per tab under a
/// base directory. Good enough for `--dry-run` runs and integration tests;
/// never talks to a network.
pub struct CsvSheetsBackend {
    base_dir: PathBuf,
    tabs: Mutex<HashMap<String, Tab>>,
}

impl CsvSheetsBackend {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), tabs: Mutex::new(HashMap::new()) }
    }

    fn tab_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{name}.csv"))
    }

    fn load_from_disk(&self, name: &str) -> Tab {
        let path = self.tab_path(name);
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return Tab { header: Vec::new(), rows: Vec::new() };
        };
        let mut lines = contents.lines();
        let header = lines.next().map(parse_csv_line).unwrap_or_default();
        let rows = lines.map(parse_csv_line).collect();
        Tab { header, rows }
    }

    fn flush_to_disk(&self, name: &str, tab: &Tab) -> Result<(), CrawlError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| CrawlError::SheetAppendError { tab: name.to_string(), attempts: 0, message: e.to_string() })?;
        let mut content = String::new();
        content.push_str(&render_csv_line(&tab.header));
        content.push('\n');
        for row in &tab.rows {
            content.push_str(&render_csv_line(row));
            content.push('\n');
        }
        std::fs::write(self.tab_path(name), content)
            .map_err(|e| CrawlError::SheetAppendError { tab: name.to_string(), attempts: 0, message: e.to_string() })
    }
}

#[async_trait]
impl SheetsBackend for CsvSheetsBackend {
    async fn ensure_tab(&self, name: &str, header_row: &[&str]) -> Result<(), CrawlError> {
        let mut tabs = self.tabs.lock().expect("tabs mutex poisoned");
        if !tabs.contains_key(name) {
            let mut tab = self.load_from_disk(name);
            if tab.header.is_empty() {
                tab.header = header_row.iter().map(|s| s.to_string()).collect();
                self.flush_to_disk(name, &tab)?;
            }
            tabs.insert(name.to_string(), tab);
        }
        Ok(())
    }

    async fn ensure_hidden_tab(&self, name: &str, header_row: &[&str]) -> Result<(), CrawlError> {
        // The mock backend has no concept of tab visibility.
        self.ensure_tab(name, header_row).await
    }

    async fn append_rows(&self, tab: &str, rows: &[Vec<String>]) -> Result<(), CrawlError> {
        let mut tabs = self.tabs.lock().expect("tabs mutex poisoned");
        let entry = tabs.entry(tab.to_string()).or_insert_with(|| self.load_from_disk(tab));
        entry.rows.extend(rows.iter().cloned());
        self.flush_to_disk(tab, entry)
    }

    async fn read_column(&self, tab: &str, letter: &str) -> Result<Vec<String>, CrawlError> {
        let mut tabs = self.tabs.lock().expect("tabs mutex poisoned");
        let entry = tabs.entry(tab.to_string()).or_insert_with(|| self.load_from_disk(tab));
        let idx = column_index(letter);
        Ok(entry.rows.iter().filter_map(|row| row.get(idx).cloned()).collect())
    }

    async fn rewrite_tab(&self, tab: &str, rows: &[Vec<String>]) -> Result<(), CrawlError> {
        let mut tabs = self.tabs.lock().expect("tabs mutex poisoned");
        let entry = tabs.entry(tab.to_string()).or_insert_with(|| self.load_from_disk(tab));
        entry.rows = rows.to_vec();
        self.flush_to_disk(tab, entry)
    }
}

/// Backs `--dry-run`: every operation succeeds without touching disk, and
/// `read_column` always reports an empty seen-set (§6.1: "skip all C10 writes").
pub struct NoopSheetsBackend;

#[async_trait]
impl SheetsBackend for NoopSheetsBackend {
    async fn ensure_tab(&self, _name: &str, _header_row: &[&str]) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn ensure_hidden_tab(&self, _name: &str, _header_row: &[&str]) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn append_rows(&self, _tab: &str, _rows: &[Vec<String>]) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn read_column(&self, _tab: &str, _letter: &str) -> Result<Vec<String>, CrawlError> {
        Ok(Vec::new())
    }

    async fn rewrite_tab(&self, _tab: &str, _rows: &[Vec<String>]) -> Result<(), CrawlError> {
        Ok(())
    }
}

fn parse_csv_line(line: &str) -> Vec<String> {
    line.split(',').map(|cell| cell.replace("\\,", ",")).collect()
}

fn render_csv_line(cells: &[String]) -> String {
    cells.iter().map(|cell| cell.replace(',', "\\,")).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::super::{PRODUCT_TAB_HEADER, STATE_TAB_HEADER};
    use super::*;

    #[tokio::test]
    async fn ensure_tab_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CsvSheetsBackend::new(dir.path());
        backend.ensure_tab("site-a", PRODUCT_TAB_HEADER).await.unwrap();
        backend.ensure_tab("site-a", PRODUCT_TAB_HEADER).await.unwrap();
        let contents = std::fs::read_to_string(dir.path().join("site-a.csv")).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn append_then_read_column() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CsvSheetsBackend::new(dir.path());
        backend.ensure_tab("site-a", PRODUCT_TAB_HEADER).await.unwrap();
        backend
            .append_rows(
                "site-a",
                &[vec!["s".into(), "c".into(), "cu".into(), "https://x/a".into()]],
            )
            .await
            .unwrap();
        let col = backend.read_column("site-a", "D").await.unwrap();
        assert_eq!(col, vec!["https://x/a".to_string()]);
    }

    #[tokio::test]
    async fn rewrite_tab_replaces_all_rows() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CsvSheetsBackend::new(dir.path());
        backend.ensure_tab("_state", STATE_TAB_HEADER).await.unwrap();
        backend.rewrite_tab("_state", &[vec!["a".into(), "b".into()]]).await.unwrap();
        let col = backend.read_column("_state", "A").await.unwrap();
        assert_eq!(col, vec!["a".to_string()]);
    }
}
