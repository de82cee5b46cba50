//! Per-category crawl pipeline (C8, §4.8): pagination, extraction, per-product
//! dispatch, throttling, and state updates.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;
use scraper::{Html, Selector};

use crate::config::types::{PaginationMode, SiteConfig, StopCondition};
use crate::content_fetcher::{self, ProductContent};
use crate::engine::{BehaviorContext, EngineRequest, FetchEngine};
use crate::error::{CrawlError, ErrorEvent, ErrorSource};
use crate::image_saver;
use crate::run_context::RunContext;
use crate::sheets::{ProductRecord, SheetsWriter};
use crate::state_store::{CategoryState, StateStore};

use super::pagination;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    Done,
    Stopped,
}

pub struct SiteCrawler {
    pub site: SiteConfig,
    pub category_engine: Arc<dyn FetchEngine>,
    pub product_engine: Arc<dyn FetchEngine>,
    pub http_engine: Arc<crate::engine::http::HttpEngine>,
    pub dedupe_param_blacklist: Vec<String>,
    pub image_dir: PathBuf,
    pub page_delay_sec: (f64, f64),
    pub product_delay_sec: (f64, f64),
    pub state_store: Arc<StateStore>,
    pub writer: Arc<SheetsWriter>,
    pub run_context: Arc<RunContext>,
    pub resume: bool,
    pub skipped_log_path: PathBuf,
}

impl SiteCrawler {
    /// Drives a single category from its resume point (if any) to a terminal
    /// state. Errors returned here are unrecoverable engine failures (§7:
    /// "`ProxyPoolExhausted` aborts the current category with `FAILED`");
    /// per-product failures are handled internally and never abort the loop.
    pub async fn run_category(&self, category_url: &str) -> Result<CrawlOutcome, CrawlError> {
        let tab = self.site.domain.clone();
        let existing = if self.resume {
            self.state_store.get(&self.site.name, category_url).await?
        } else {
            None
        };

        match self.site.pagination.mode {
            PaginationMode::NumberedPages => self.run_numbered_pages(category_url, &tab, existing).await,
            PaginationMode::NextButton => self.run_next_button(category_url, &tab, existing).await,
            PaginationMode::InfiniteScroll => self.run_infinite_scroll(category_url, &tab, existing).await,
        }
    }

    async fn run_numbered_pages(
        &self,
        category_url: &str,
        tab: &str,
        existing: Option<CategoryState>,
    ) -> Result<CrawlOutcome, CrawlError> {
        let param_name = self.site.pagination.param_name.as_deref().unwrap_or("page");
        let mut page = pagination::start_page(&self.site.pagination, existing.as_ref().map(|s| s.last_page));
        let mut product_count = existing.as_ref().map(|s| s.last_product_count).unwrap_or(0);
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            if self.run_context.should_stop() {
                return Ok(CrawlOutcome::Stopped);
            }
            if pagination::numbered_pages_exhausted(&self.site.pagination, page) {
                return Ok(CrawlOutcome::Done);
            }

            let url = pagination::numbered_page_url(category_url, param_name, page);
            let fetch_result = self.fetch_category_page(&url, category_url).await?;
            let stop_hit = self.evaluate_stop_conditions(&fetch_result.html, page);

            let new_links = self.extract_new_links(&fetch_result.html, &mut seen);
            if new_links.is_empty() {
                return Ok(CrawlOutcome::Done);
            }

            for (hash, product_url) in new_links {
                if self
                    .process_product(tab, category_url, &product_url, &hash, page)
                    .await
                {
                    product_count += 1;
                    self.upsert_state(category_url, page, product_count).await?;
                    if self.category_limit_reached(product_count) || self.run_context.should_stop() {
                        return Ok(CrawlOutcome::Stopped);
                    }
                }
            }

            if stop_hit {
                return Ok(CrawlOutcome::Stopped);
            }

            page += 1;
            self.sleep_between(self.page_delay_sec).await;
        }
    }

    async fn run_next_button(
        &self,
        category_url: &str,
        tab: &str,
        existing: Option<CategoryState>,
    ) -> Result<CrawlOutcome, CrawlError> {
        let selector = self.site.selectors.next_button_selector.clone();
        let mut current_url = category_url.to_string();
        let mut page = existing.as_ref().map(|s| s.last_page).unwrap_or(1).max(1);
        let mut product_count = existing.as_ref().map(|s| s.last_product_count).unwrap_or(0);
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            if self.run_context.should_stop() {
                return Ok(CrawlOutcome::Stopped);
            }

            let fetch_result = self.fetch_category_page(&current_url, category_url).await?;
            let stop_hit = self.evaluate_stop_conditions(&fetch_result.html, page);
            let new_links = self.extract_new_links(&fetch_result.html, &mut seen);

            for (hash, product_url) in new_links {
                if self
                    .process_product(tab, category_url, &product_url, &hash, page)
                    .await
                {
                    product_count += 1;
                    self.upsert_state(category_url, page, product_count).await?;
                    if self.category_limit_reached(product_count) || self.run_context.should_stop() {
                        return Ok(CrawlOutcome::Stopped);
                    }
                }
            }

            if stop_hit {
                return Ok(CrawlOutcome::Stopped);
            }

            let Some(selector) = selector.as_deref() else { return Ok(CrawlOutcome::Done) };
            match pagination::next_button_href(&fetch_result.html, selector, &self.site.base_url) {
                Some(next_url) => {
                    current_url = next_url;
                    page += 1;
                    self.sleep_between(self.page_delay_sec).await;
                }
                None => return Ok(CrawlOutcome::Done),
            }
        }
    }

    async fn run_infinite_scroll(
        &self,
        category_url: &str,
        tab: &str,
        existing: Option<CategoryState>,
    ) -> Result<CrawlOutcome, CrawlError> {
        let max_scrolls = self.site.limits.max_scrolls.unwrap_or(u32::MAX);
        let mut scrolls = existing.as_ref().map(|s| s.last_page).unwrap_or(0);
        let mut product_count = existing.as_ref().map(|s| s.last_product_count).unwrap_or(0);
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            if self.run_context.should_stop() {
                return Ok(CrawlOutcome::Stopped);
            }
            if scrolls >= max_scrolls {
                return Ok(CrawlOutcome::Done);
            }

            // Each fetch of the (single) category URL re-runs the browser
            // engine's behavior-controller scroll pass (C5), surfacing
            // whatever additional product cards that scroll revealed.
            let fetch_result = self.fetch_category_page(category_url, category_url).await?;
            let stop_hit = self.evaluate_stop_conditions(&fetch_result.html, scrolls + 1);
            let new_links = self.extract_new_links(&fetch_result.html, &mut seen);

            if new_links.is_empty() {
                return Ok(CrawlOutcome::Done);
            }

            for (hash, product_url) in new_links {
                if self
                    .process_product(tab, category_url, &product_url, &hash, scrolls + 1)
                    .await
                {
                    product_count += 1;
                    self.upsert_state(category_url, scrolls + 1, product_count).await?;
                    if self.category_limit_reached(product_count) || self.run_context.should_stop() {
                        return Ok(CrawlOutcome::Stopped);
                    }
                }
            }

            if stop_hit {
                return Ok(CrawlOutcome::Stopped);
            }

            scrolls += 1;
            self.sleep_between(self.page_delay_sec).await;
        }
    }

    async fn fetch_category_page(
        &self,
        url: &str,
        category_url: &str,
    ) -> Result<crate::engine::FetchResult, CrawlError> {
        let mut request = EngineRequest::new(url);
        request.wait_conditions = self.site.wait_conditions.clone();
        request.stop_conditions = self.site.stop_conditions.clone();
        request.behavior_context = Some(BehaviorContext {
            category_selector: self.site.selectors.hover_targets.first().cloned(),
            category_url: category_url.to_string(),
            base_url: self.site.base_url.clone(),
            root_url: self.site.base_url.clone(),
            is_product_page: false,
            product_link_selector: Some(self.site.selectors.product_link_selector.clone()),
            scroll_min_override: self.site.pagination.scroll_min_depth,
            scroll_max_override: self.site.pagination.scroll_max_depth,
        });
        self.category_engine.fetch(request).await
    }

    fn evaluate_stop_conditions(&self, html: &str, current_page: u32) -> bool {
        self.site.stop_conditions.iter().any(|cond| match cond {
            StopCondition::MissingSelector { value } => match Selector::parse(value) {
                Ok(selector) => Html::parse_document(html).select(&selector).next().is_none(),
                Err(_) => false,
            },
            StopCondition::MaxPages { value } => current_page >= *value,
        })
    }

    /// Extracts `product_link_selector` matches, canonicalizes and
    /// fingerprints each, and filters out links already present in `seen`
    /// (mutated in place with the newly discovered hashes).
    fn extract_new_links(&self, html: &str, seen: &mut HashSet<String>) -> Vec<(String, String)> {
        let Ok(selector) = Selector::parse(&self.site.selectors.product_link_selector) else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        let mut out = Vec::new();
        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href") else { continue };
            let Ok(canonical) = crate::normalize::canonicalize(href, &self.site.base_url, &self.dedupe_param_blacklist)
            else {
                continue;
            };
            let hash = crate::normalize::fingerprint(&canonical);
            if seen.insert(hash.clone()) {
                out.push((hash, canonical));
            }
        }
        out
    }

    /// `true` once `limits.max_products` products have been committed for
    /// this category (§4.8 step 6 / §8 boundary: "at most N products per
    /// category are committed").
    fn category_limit_reached(&self, product_count: u64) -> bool {
        self.site.limits.max_products.is_some_and(|max| product_count >= max)
    }

    async fn upsert_state(&self, category_url: &str, last_page: u32, last_product_count: u64) -> Result<(), CrawlError> {
        self.state_store
            .upsert(&CategoryState {
                site_name: self.site.name.clone(),
                category_url: category_url.to_string(),
                last_page,
                last_product_count,
                last_run_ts: chrono::Utc::now(),
            })
            .await
    }

    async fn sleep_between(&self, (min, max): (f64, f64)) {
        let delay = if max > min { rand::rng().random_range(min..max) } else { min };
        tokio::time::sleep(std::time::Duration::from_secs_f64(delay.max(0.0))).await;
    }

    /// Full per-product sequence (§4.8). Returns `true` iff the product was
    /// durably committed and the category's progress counters may advance.
    async fn process_product(
        &self,
        tab: &str,
        category_url: &str,
        product_url: &str,
        product_id_hash: &str,
        page_num: u32,
    ) -> bool {
        self.sleep_between(self.product_delay_sec).await;

        if let Ok(true) = self.writer.already_seen(tab, product_url).await {
            return false;
        }

        let behavior_context = Some(BehaviorContext {
            category_selector: self.site.selectors.product_hover_targets.first().cloned(),
            category_url: category_url.to_string(),
            base_url: self.site.base_url.clone(),
            root_url: self.site.base_url.clone(),
            is_product_page: true,
            product_link_selector: None,
            scroll_min_override: None,
            scroll_max_override: None,
        });
        let content = match content_fetcher::fetch_product_content(
            &self.product_engine,
            product_url,
            &self.site.selectors,
            behavior_context,
        )
        .await
        {
            Ok(content) => content,
            Err(e) => {
                self.append_skipped_log(product_url, &e.to_string());
                ErrorEvent::new("product_fetch_failed", ErrorSource::Http, "rotate_proxy")
                    .with_url(product_url)
                    .log_warn();
                return false;
            }
        };

        let image_path = self.save_product_image(&content, product_url).await;

        let record = self.assemble_record(category_url, product_url, product_id_hash, page_num, &content, &image_path);

        if let Err(e) = self.writer.append(tab, &record).await {
            if !image_path.is_empty() {
                let _ = std::fs::remove_file(&image_path);
            }
            self.append_skipped_log(product_url, &e.to_string());
            return false;
        }

        self.run_context.record_product();
        true
    }

    async fn save_product_image(&self, content: &ProductContent, product_url: &str) -> String {
        let Some(image_url) = content.image_url.as_deref() else { return String::new() };
        let name = content
            .name_en
            .as_deref()
            .or(content.name_ru.as_deref())
            .unwrap_or("product");

        match image_saver::save_image(&self.http_engine, image_url, name, &self.image_dir).await {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(e) => {
                ErrorEvent::new("image_save_failed", ErrorSource::Image, "none")
                    .with_url(product_url)
                    .log_warn();
                let _ = e;
                String::new()
            }
        }
    }

    fn assemble_record(
        &self,
        category_url: &str,
        product_url: &str,
        product_id_hash: &str,
        page_num: u32,
        content: &ProductContent,
        image_path: &str,
    ) -> ProductRecord {
        let mut metadata = std::collections::HashMap::new();
        if let Some(image_url) = &content.image_url {
            metadata.insert("image_url".to_string(), image_url.clone());
        }

        ProductRecord {
            source_site: self.site.name.clone(),
            category: self
                .site
                .category_labels
                .get(category_url)
                .cloned()
                .unwrap_or_else(|| category_url.to_string()),
            category_url: category_url.to_string(),
            product_url: product_url.to_string(),
            product_content: content.text.clone(),
            discovered_at: chrono::Utc::now(),
            run_id: self.run_context.run_id.clone(),
            product_id_hash: product_id_hash.to_string(),
            page_num,
            metadata,
            image_path: image_path.to_string(),
            name_en: content.name_en.clone(),
            name_ru: content.name_ru.clone(),
            price_without_discount: content.price_without_discount.clone(),
            price_with_discount: content.price_with_discount.clone(),
            status: "ok".to_string(),
            note: String::new(),
            processed_at: chrono::Utc::now(),
            llm_raw: String::new(),
        }
    }

    fn append_skipped_log(&self, product_url: &str, error: &str) {
        if let Some(parent) = self.skipped_log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let line = format!("{}\t{}\t{}\n", chrono::Utc::now().to_rfc3339(), product_url, error);
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&self.skipped_log_path) {
            use std::io::Write;
            let _ = file.write_all(line.as_bytes());
        }
    }
}
