//! Row-per-product append with bounded retry (C10, §4.10).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{CrawlError, ErrorEvent, ErrorSource};
use crate::state_store::StateStore;

use super::{ProductRecord, SheetsBackend, PRODUCT_TAB_HEADER, PRODUCT_URL_COLUMN, RUNS_TAB_HEADER, STATE_TAB_HEADER};

/// Coarse-grained sleep ladder between sheet-append attempts (§4.10, §8).
const RETRY_SLEEPS: [Duration; 2] = [Duration::from_secs(10 * 60), Duration::from_secs(20 * 60)];

struct TabState {
    seen_product_urls: HashSet<String>,
    buffer: Vec<Vec<String>>,
}

/// Per-tab seen-set and write buffer, guarded per tab so categories of
/// different domains never contend on each other's lock (§5).
pub struct SheetsWriter {
    backend: Arc<dyn SheetsBackend>,
    flush_interval: usize,
    state_tab: String,
    runs_tab: String,
    tabs: Mutex<HashMap<String, TabState>>,
}

impl SheetsWriter {
    pub fn new(
        backend: Arc<dyn SheetsBackend>,
        flush_interval: usize,
        state_tab: impl Into<String>,
        runs_tab: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            flush_interval: flush_interval.max(1),
            state_tab: state_tab.into(),
            runs_tab: runs_tab.into(),
            tabs: Mutex::new(HashMap::new()),
        }
    }

    async fn ensure_tab_loaded(&self, tab: &str) -> Result<(), CrawlError> {
        {
            let tabs = self.tabs.lock();
            if tabs.contains_key(tab) {
                return Ok(());
            }
        }
        self.backend.ensure_tab(tab, PRODUCT_TAB_HEADER).await?;
        let seen = self.backend.read_column(tab, PRODUCT_URL_COLUMN).await?;
        self.tabs.lock().insert(
            tab.to_string(),
            TabState { seen_product_urls: seen.into_iter().collect(), buffer: Vec::new() },
        );
        Ok(())
    }

    pub async fn ensure_ambient_tabs(&self) -> Result<(), CrawlError> {
        self.backend.ensure_hidden_tab(&self.state_tab, STATE_TAB_HEADER).await?;
        self.backend.ensure_hidden_tab(&self.runs_tab, RUNS_TAB_HEADER).await?;
        Ok(())
    }

    /// `true` if `product_url` has already been written to `tab` in any run.
    pub async fn already_seen(&self, tab: &str, product_url: &str) -> Result<bool, CrawlError> {
        self.ensure_tab_loaded(tab).await?;
        let tabs = self.tabs.lock();
        Ok(tabs.get(tab).expect("just loaded").seen_product_urls.contains(product_url))
    }

    /// Buffers `record`, flushing when the tab's buffer reaches
    /// `flush_interval`. On an append failure exhausting the retry ladder,
    /// the record is dropped from the buffer and the error is returned so the
    /// caller can roll back the saved image.
    pub async fn append(&self, tab: &str, record: &ProductRecord) -> Result<(), CrawlError> {
        self.ensure_tab_loaded(tab).await?;

        let ready_to_flush = {
            let mut tabs = self.tabs.lock();
            let state = tabs.get_mut(tab).expect("just loaded");
            state.buffer.push(record.to_row());
            state.seen_product_urls.insert(record.product_url.clone());
            state.buffer.len() >= self.flush_interval
        };

        if ready_to_flush {
            self.flush(tab).await?;
        }
        Ok(())
    }

    async fn flush(&self, tab: &str) -> Result<(), CrawlError> {
        let rows = {
            let mut tabs = self.tabs.lock();
            let state = tabs.get_mut(tab).expect("tab loaded before flush");
            std::mem::take(&mut state.buffer)
        };
        if rows.is_empty() {
            return Ok(());
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.backend.append_rows(tab, &rows).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= 3 => {
                    ErrorEvent::new("sheet_append_failed", ErrorSource::Sheet, "refresh_pool")
                        .with_detail("tab", tab)
                        .with_retry_index(attempt)
                        .log_error();
                    return Err(CrawlError::SheetAppendError {
                        tab: tab.to_string(),
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    ErrorEvent::new("sheet_append_retry", ErrorSource::Sheet, "wait_and_retry")
                        .with_detail("tab", tab)
                        .with_retry_index(attempt)
                        .log_warn();
                    tokio::time::sleep(RETRY_SLEEPS[(attempt - 1) as usize]).await;
                }
            }
        }
    }

    /// Forces out any buffered rows regardless of `flush_interval`, used on
    /// cancellation and at end-of-run.
    pub async fn flush_all(&self, tab: &str) -> Result<(), CrawlError> {
        self.flush(tab).await
    }

    pub async fn refresh_state_tab(&self, state_store: &StateStore, site_name: &str) -> Result<(), CrawlError> {
        let rows: Vec<Vec<String>> = state_store
            .iter_site_state(site_name)
            .await?
            .into_iter()
            .map(|s| {
                vec![
                    s.site_name,
                    s.category_url,
                    s.last_page.to_string(),
                    s.last_product_count.to_string(),
                    s.last_run_ts.to_rfc3339(),
                ]
            })
            .collect();
        self.backend.rewrite_tab(&self.state_tab, &rows).await
    }

    pub async fn append_run_record(
        &self,
        run_id: &str,
        site: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        products_total: u64,
        products_new: u64,
    ) -> Result<(), CrawlError> {
        let row = vec![
            run_id.to_string(),
            site.to_string(),
            started_at.to_rfc3339(),
            finished_at.to_rfc3339(),
            products_total.to_string(),
            products_new.to_string(),
        ];
        self.backend.append_rows(&self.runs_tab, &[row]).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::sheets::backend::CsvSheetsBackend;

    /// Fails `append_rows` the first `fail_times` calls, then delegates to a
    /// real [`CsvSheetsBackend`] (§8 scenario 5: recovery after two failures).
    struct FlakyBackend {
        inner: CsvSheetsBackend,
        fail_times: u32,
        attempts: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SheetsBackend for FlakyBackend {
        async fn ensure_tab(&self, name: &str, header_row: &[&str]) -> Result<(), CrawlError> {
            self.inner.ensure_tab(name, header_row).await
        }

        async fn ensure_hidden_tab(&self, name: &str, header_row: &[&str]) -> Result<(), CrawlError> {
            self.inner.ensure_hidden_tab(name, header_row).await
        }

        async fn append_rows(&self, tab: &str, rows: &[Vec<String>]) -> Result<(), CrawlError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_times {
                return Err(CrawlError::SheetAppendError {
                    tab: tab.to_string(),
                    attempts: attempt,
                    message: "simulated transport error".to_string(),
                });
            }
            self.inner.append_rows(tab, rows).await
        }

        async fn read_column(&self, tab: &str, letter: &str) -> Result<Vec<String>, CrawlError> {
            self.inner.read_column(tab, letter).await
        }

        async fn rewrite_tab(&self, tab: &str, rows: &[Vec<String>]) -> Result<(), CrawlError> {
            self.inner.rewrite_tab(tab, rows).await
        }
    }

    fn sample_record(url: &str) -> ProductRecord {
        ProductRecord {
            source_site: "site-a".to_string(),
            category: "cat".to_string(),
            category_url: "https://x/cat".to_string(),
            product_url: url.to_string(),
            product_content: "text".to_string(),
            discovered_at: Utc::now(),
            run_id: "run-1".to_string(),
            product_id_hash: "hash".to_string(),
            page_num: 1,
            metadata: StdHashMap::new(),
            image_path: String::new(),
            name_en: None,
            name_ru: None,
            price_without_discount: None,
            price_with_discount: None,
            status: "ok".to_string(),
            note: String::new(),
            processed_at: Utc::now(),
            llm_raw: String::new(),
        }
    }

    #[tokio::test]
    async fn append_flushes_at_interval_and_seeds_seen_set() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn SheetsBackend> = Arc::new(CsvSheetsBackend::new(dir.path()));
        let writer = SheetsWriter::new(backend.clone(), 1, "_state", "_runs");

        writer.append("site-a", &sample_record("https://x/a")).await.unwrap();
        assert!(writer.already_seen("site-a", "https://x/a").await.unwrap());

        let col = backend.read_column("site-a", PRODUCT_URL_COLUMN).await.unwrap();
        assert_eq!(col, vec!["https://x/a".to_string()]);
    }

    #[tokio::test]
    async fn buffer_holds_below_flush_interval() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn SheetsBackend> = Arc::new(CsvSheetsBackend::new(dir.path()));
        let writer = SheetsWriter::new(backend.clone(), 2, "_state", "_runs");

        writer.append("site-a", &sample_record("https://x/a")).await.unwrap();
        let col = backend.read_column("site-a", PRODUCT_URL_COLUMN).await.unwrap();
        assert!(col.is_empty(), "row should still be buffered, not yet flushed");

        writer.append("site-a", &sample_record("https://x/b")).await.unwrap();
        let col = backend.read_column("site-a", PRODUCT_URL_COLUMN).await.unwrap();
        assert_eq!(col.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_recovers_after_two_failures_on_the_retry_ladder() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn SheetsBackend> = Arc::new(FlakyBackend {
            inner: CsvSheetsBackend::new(dir.path()),
            fail_times: 2,
            attempts: AtomicU32::new(0),
        });
        let writer = Arc::new(SheetsWriter::new(backend.clone(), 1, "_state", "_runs"));

        let writer_for_task = writer.clone();
        let append_task =
            tokio::spawn(async move { writer_for_task.append("site-a", &sample_record("https://x/a")).await });

        tokio::time::advance(Duration::from_secs(10 * 60 + 1)).await;
        tokio::time::advance(Duration::from_secs(20 * 60 + 1)).await;

        append_task.await.unwrap().unwrap();
        assert!(writer.already_seen("site-a", "https://x/a").await.unwrap());

        let col = backend.read_column("site-a", PRODUCT_URL_COLUMN).await.unwrap();
        assert_eq!(col, vec!["https://x/a".to_string()]);
    }
}
