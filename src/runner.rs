//! Sequential per-site driver (A1, §4.11, §5: "sites are processed
//! sequentially by the runner to contain spreadsheet quota").

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::loader::ResolvedPaths;
use crate::config::types::{EngineKind, GlobalConfig, SiteConfig};
use crate::crawler::{CrawlOutcome, SiteCrawler};
use crate::engine::browser::{BrowserEngine, BrowserEngineConfig};
use crate::engine::http::HttpEngine;
use crate::engine::FetchEngine;
use crate::error::{CrawlError, ErrorEvent, ErrorSource};
use crate::proxy_pool::ProxyPool;
use crate::run_context::RunContext;
use crate::sheets::{CsvSheetsBackend, NoopSheetsBackend, SheetsBackend, SheetsWriter};
use crate::state_store::StateStore;

pub struct Runner {
    pub global: GlobalConfig,
    pub sites: Vec<SiteConfig>,
    pub resume: bool,
    pub reset_state: bool,
    pub dry_run: bool,
    pub paths: ResolvedPaths,
    pub run_context: Arc<RunContext>,
}

impl Runner {
    /// Drives every configured site to completion or cancellation, returning
    /// the process exit code (§6.1: 0 success/stopped, 3 unrecoverable error).
    pub async fn run(&self, cancelled: Arc<std::sync::atomic::AtomicBool>) -> Result<i32, CrawlError> {
        let proxy_pool = Arc::new(ProxyPool::new(
            &self.global.network.proxies,
            self.global.network.allow_direct,
            Some(self.paths.bad_egress_log.clone()),
        ));

        let http_engine = Arc::new(HttpEngine::new(
            proxy_pool.clone(),
            self.global.network.user_agents.clone(),
            self.global.network.accept_language.clone(),
            Duration::from_secs(self.global.network.request_timeout_sec),
            self.global.network.retry.backoff_sec.clone(),
        ));

        let browser_engine: Arc<BrowserEngine> = Arc::new(BrowserEngine::new(
            proxy_pool.clone(),
            BrowserEngineConfig {
                headless: self.global.network.headless,
                slow_mo_ms: self.global.network.slow_mo_ms,
                user_agents: self.global.network.user_agents.clone(),
                accept_language: self.global.network.accept_language.clone(),
                storage_state_path: self.global.network.storage_state_path.clone(),
                short_backoff_sec: self.global.network.retry.backoff_sec.clone(),
                behavior: self.global.runtime.behavior.clone(),
                preview_before_behavior_sec: self.global.network.preview_before_behavior_sec,
                extra_page_preview_sec: self.global.network.extra_page_preview_sec,
                preview_delay_sec: self.global.network.preview_delay_sec,
            },
        ));

        let state_store = Arc::new(StateStore::connect(&self.paths.state_db).await?);
        if self.reset_state {
            state_store.reset_all().await?;
        }

        let backend: Arc<dyn SheetsBackend> = if self.dry_run {
            Arc::new(NoopSheetsBackend)
        } else {
            let sheets_dir = self.paths.state_db.parent().unwrap_or_else(|| std::path::Path::new(".")).join("sheets");
            Arc::new(CsvSheetsBackend::new(sheets_dir))
        };
        let flush_interval = crate::config::loader::resolved_write_flush_interval(&self.global);
        let writer = Arc::new(SheetsWriter::new(
            backend,
            flush_interval,
            self.global.sheet.state_tab.clone(),
            self.global.sheet.runs_tab.clone(),
        ));
        writer.ensure_ambient_tabs().await?;

        let skipped_log_path = self.paths.state_db.with_file_name("skipped_products.log");

        let mut exit_code = 0;
        for site in &self.sites {
            if cancelled.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }

            let category_engine = self.engine_for(site.engine, &http_engine, &browser_engine);
            let product_engine_kind = self.global.product_fetch_engine.unwrap_or(site.engine);
            let product_engine = self.engine_for(product_engine_kind, &http_engine, &browser_engine);

            let crawler = Arc::new(SiteCrawler {
                site: site.clone(),
                category_engine,
                product_engine,
                http_engine: http_engine.clone(),
                dedupe_param_blacklist: self.global.dedupe.param_blacklist.clone(),
                image_dir: self.paths.image_dir.join(&site.name),
                page_delay_sec: (self.global.runtime.page_delay_min_sec, self.global.runtime.page_delay_max_sec),
                product_delay_sec: (
                    self.global.runtime.product_delay_min_sec,
                    self.global.runtime.product_delay_max_sec,
                ),
                state_store: state_store.clone(),
                writer: writer.clone(),
                run_context: self.run_context.clone(),
                resume: self.resume,
                skipped_log_path: skipped_log_path.clone(),
            });

            let started_at = Utc::now();
            let products_before = self.run_context.products_committed();
            let mut site_failed = false;

            // Up to `max_concurrency_per_site` categories run concurrently
            // (§5); scheduling of new categories stops at a cancellation or
            // a global stop threshold, but already-spawned categories are
            // allowed to finish.
            let max_concurrency = self.global.runtime.max_concurrency_per_site.max(1);
            let semaphore = Arc::new(tokio::sync::Semaphore::new(max_concurrency));
            let mut handles = Vec::new();
            for category_url in &site.category_urls {
                if cancelled.load(std::sync::atomic::Ordering::SeqCst) || self.run_context.should_stop() {
                    break;
                }
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                let crawler = crawler.clone();
                let category_url = category_url.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    (category_url.clone(), crawler.run_category(&category_url).await)
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok((_, Ok(CrawlOutcome::Done | CrawlOutcome::Stopped))) => {}
                    Ok((category_url, Err(e))) => {
                        ErrorEvent::new("category_failed", ErrorSource::State, "refresh_pool")
                            .with_url(&category_url)
                            .log_error();
                        let _ = e;
                        site_failed = true;
                        exit_code = 3;
                    }
                    Err(join_err) => {
                        tracing::error!(error = %join_err, "category task panicked");
                        site_failed = true;
                        exit_code = 3;
                    }
                }
            }

            writer.refresh_state_tab(&state_store, &site.name).await?;
            let products_total = self.run_context.products_committed() - products_before;
            writer
                .append_run_record(&self.run_context.run_id, &site.name, started_at, Utc::now(), products_total, products_total)
                .await?;

            if site_failed {
                continue;
            }
        }

        Ok(exit_code)
    }

    fn engine_for(
        &self,
        kind: EngineKind,
        http_engine: &Arc<HttpEngine>,
        browser_engine: &Arc<BrowserEngine>,
    ) -> Arc<dyn FetchEngine> {
        match kind {
            EngineKind::Http => http_engine.clone(),
            EngineKind::Browser => browser_engine.clone(),
        }
    }
}
