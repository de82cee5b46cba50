//! Headless-browser fetch engine (C4, §4.4).
//!
//! Follows the donor crate's `chromiumoxide` launch pattern
//! (`browser_setup::find_browser_executable` / `BrowserConfigBuilder`) and its
//! per-page navigation + timeout wrapping (`crawl_engine::page_processor`),
//! adapted to the wait/stop-condition and short+long retry-ladder contract
//! this spec requires.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use rand::seq::IndexedRandom;

use crate::config::types::{BehaviorConfig, StopCondition, WaitCondition};
use crate::error::{CrawlError, ErrorEvent, ErrorSource};
use crate::proxy_pool::{Egress, Outcome, ProxyPool};

use super::behavior::BehaviorController;
use super::{BehaviorAction, EngineRequest, FetchEngine, FetchResult};

/// Pre-exported cookies/local storage applied to the page right after its
/// first navigation, restoring a logged-in session without re-authenticating
/// (§4.4: "optional pre-exported storage state (cookies + local storage)").
#[derive(Debug, Clone, serde::Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StorageCookie>,
    #[serde(default)]
    pub local_storage: Vec<StorageEntry>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct StorageCookie {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

fn load_storage_state(path: &std::path::Path) -> Option<StorageState> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| tracing::warn!(path = %path.display(), error = %e, "storage state file unreadable"))
        .ok()?;
    serde_json::from_str(&raw)
        .map_err(|e| tracing::warn!(path = %path.display(), error = %e, "storage state file malformed"))
        .ok()
}

pub struct BrowserEngineConfig {
    pub headless: bool,
    pub slow_mo_ms: u64,
    pub user_agents: Vec<String>,
    pub accept_language: String,
    pub storage_state_path: Option<PathBuf>,
    pub short_backoff_sec: Vec<u64>,
    pub behavior: BehaviorConfig,
    pub preview_before_behavior_sec: u64,
    pub extra_page_preview_sec: u64,
    pub preview_delay_sec: u64,
}

/// Drives a headless browser for each request, re-acquiring an egress on every
/// retry step of the short+long ladder (§4.4).
pub struct BrowserEngine {
    proxy_pool: Arc<ProxyPool>,
    config: BrowserEngineConfig,
    storage_state: Option<StorageState>,
}

impl BrowserEngine {
    pub fn new(proxy_pool: Arc<ProxyPool>, config: BrowserEngineConfig) -> Self {
        let storage_state = config.storage_state_path.as_deref().and_then(load_storage_state);
        Self { proxy_pool, config, storage_state }
    }

    fn pick_user_agent(&self) -> &str {
        self.config
            .user_agents
            .choose(&mut rand::rng())
            .map(String::as_str)
            .unwrap_or("Mozilla/5.0")
    }

    async fn launch(&self, egress: &Egress) -> Result<Browser, CrawlError> {
        let mut builder = BrowserConfig::builder()
            .headless(self.config.headless)
            .user_agent(self.pick_user_agent());

        if self.config.slow_mo_ms > 0 {
            builder = builder.request_timeout(Duration::from_millis(self.config.slow_mo_ms));
        }
        if let Egress::Proxy(url) = egress {
            builder = builder.arg(format!("--proxy-server={url}"));
        }

        let browser_config = builder
            .build()
            .map_err(|e| CrawlError::TransportError { url: egress.to_string(), source: anyhow::anyhow!(e) })?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| CrawlError::TransportError { url: egress.to_string(), source: e.into() })?;

        tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(browser)
    }

    async fn navigate_once(
        &self,
        browser: &Browser,
        request: &EngineRequest,
    ) -> Result<(Page, bool, Option<Vec<BehaviorAction>>), CrawlError> {
        let page = browser
            .new_page(&request.url)
            .await
            .map_err(|e| CrawlError::TransportError { url: request.url.clone(), source: e.into() })?;

        page.wait_for_navigation()
            .await
            .map_err(|e| CrawlError::TransportError { url: request.url.clone(), source: e.into() })?;

        if let Some(state) = &self.storage_state {
            self.apply_storage_state(&page, state).await;
        }

        if self.config.preview_delay_sec > 0 {
            tracing::debug!(seconds = self.config.preview_delay_sec, url = %request.url, "preview delay after navigation");
            tokio::time::sleep(Duration::from_secs(self.config.preview_delay_sec)).await;
        }

        for cond in &request.wait_conditions {
            self.apply_wait_condition(&page, cond).await?;
        }

        let mut behavior_trace: Option<Vec<BehaviorAction>> = None;
        if self.config.behavior.enabled
            && let Some(ctx) = request.behavior_context.as_ref()
        {
            if self.config.preview_before_behavior_sec > 0 {
                tracing::debug!(
                    seconds = self.config.preview_before_behavior_sec,
                    url = %request.url,
                    "preview delay before behavior pass"
                );
                tokio::time::sleep(Duration::from_secs(self.config.preview_before_behavior_sec)).await;
            }

            let controller = BehaviorController::new(&self.config.behavior);
            match controller.run(browser, &page, ctx).await {
                Ok(trace) => behavior_trace = Some(trace),
                Err(e) => {
                    ErrorEvent::new("behavior_failed", ErrorSource::Browser, "wait_networkidle")
                        .with_url(&request.url)
                        .log_warn();
                    let _ = e;
                }
            }
        }

        if self.config.extra_page_preview_sec > 0 {
            tracing::debug!(seconds = self.config.extra_page_preview_sec, url = %request.url, "extra page preview delay");
            tokio::time::sleep(Duration::from_secs(self.config.extra_page_preview_sec)).await;
        }

        let stopped = request
            .stop_conditions
            .iter()
            .any(|cond| self.evaluate_stop_condition_cached(cond));

        Ok((page, stopped, behavior_trace))
    }

    /// Best-effort: a cookie or storage item that fails to apply should not
    /// fail the whole navigation.
    async fn apply_storage_state(&self, page: &Page, state: &StorageState) {
        for cookie in &state.cookies {
            let script = format!(
                "document.cookie = {:?}",
                format!("{}={}; path=/", cookie.name, cookie.value)
            );
            let _ = page.evaluate(script).await;
        }
        for entry in &state.local_storage {
            let script = format!("window.localStorage.setItem({:?}, {:?})", entry.name, entry.value);
            let _ = page.evaluate(script).await;
        }
    }

    async fn apply_wait_condition(&self, page: &Page, cond: &WaitCondition) -> Result<(), CrawlError> {
        match cond {
            WaitCondition::Timeout { value } => {
                tokio::time::sleep(Duration::from_millis(*value)).await;
                Ok(())
            }
            WaitCondition::Selector { value, timeout_ms } => {
                let deadline = tokio::time::Instant::now() + Duration::from_millis(*timeout_ms);
                loop {
                    if page.find_element(value).await.is_ok() {
                        return Ok(());
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Ok(()); // bounded timeout expires; extraction proceeds regardless (§4.4 step 2)
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Stop-condition selectors are evaluated by the crawler against the
    /// captured HTML (see `crawler::site_crawler`); this placeholder exists so
    /// unit tests can exercise the navigation loop without a real DOM.
    fn evaluate_stop_condition_cached(&self, _cond: &StopCondition) -> bool {
        false
    }

    async fn read_content_with_retry(&self, page: &Page, url: &str) -> Result<String, CrawlError> {
        match page.content().await {
            Ok(html) => Ok(html),
            Err(first_err) => {
                ErrorEvent::new("navigation_busy", ErrorSource::Browser, "wait_networkidle")
                    .with_url(url)
                    .log_warn();
                let _ = page.wait_for_navigation().await;
                let jitter = rand::rng().random_range(500u64..=1000u64);
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                page.content().await.map_err(|_| CrawlError::NavigationBusy { url: url.to_string() }).map_err(|e| {
                    let _ = &first_err;
                    e
                })
            }
        }
    }

    async fn attempt(&self, request: &EngineRequest, retry_index: u32) -> Result<FetchResult, CrawlError> {
        let egress = self.proxy_pool.acquire()?;
        let browser = self.launch(&egress).await?;

        let result = async {
            let (page, stopped, behavior_trace) = self.navigate_once(&browser, request).await?;
            let html = self.read_content_with_retry(&page, &request.url).await?;
            Ok::<_, CrawlError>(FetchResult {
                final_url: page.url().await.ok().flatten().unwrap_or_else(|| request.url.clone()),
                html,
                status: 200,
                egress_used: egress.to_string(),
                stopped,
                behavior_trace,
            })
        }
        .await;

        let _ = browser.close().await;

        match &result {
            Ok(_) => self.proxy_pool.report(&egress, Outcome::Ok),
            Err(CrawlError::HttpStatusError { code: 403, .. }) => {
                self.proxy_pool.report(&egress, Outcome::Http403);
            }
            Err(_) => {
                self.proxy_pool.report(&egress, Outcome::TransportError);
                ErrorEvent::new("navigation_failed", ErrorSource::Browser, "rotate_proxy")
                    .with_url(&request.url)
                    .with_proxy(egress.to_string())
                    .with_retry_index(retry_index)
                    .log_warn();
            }
        }

        result
    }
}

#[async_trait]
impl FetchEngine for BrowserEngine {
    async fn fetch(&self, request: EngineRequest) -> Result<FetchResult, CrawlError> {
        // Short ladder: delays from retry.backoff_sec (defaults 30s, 60s).
        let mut retry_index = 0u32;
        for delay_sec in std::iter::once(0).chain(self.config.short_backoff_sec.iter().copied()) {
            if delay_sec > 0 {
                tokio::time::sleep(Duration::from_secs(delay_sec)).await;
            }
            match self.attempt(&request, retry_index).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    retry_index += 1;
                    if retry_index as usize > self.config.short_backoff_sec.len() {
                        // Long ladder: two additional attempts at +120s and +240s.
                        return self.long_retry(&request, e, retry_index).await;
                    }
                }
            }
        }
        unreachable!("short ladder always returns or falls through to long_retry")
    }
}

impl BrowserEngine {
    async fn long_retry(
        &self,
        request: &EngineRequest,
        mut last_err: CrawlError,
        mut retry_index: u32,
    ) -> Result<FetchResult, CrawlError> {
        for delay_sec in [120u64, 240u64] {
            tokio::time::sleep(Duration::from_secs(delay_sec)).await;
            match self.attempt(request, retry_index).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    last_err = e;
                    retry_index += 1;
                }
            }
        }
        Err(last_err)
    }
}
