//! Human-behavior controller for the browser engine (C5, §4.5).
//!
//! Invoked by [`super::browser::BrowserEngine`] just before HTML capture, when
//! behavior is enabled and a [`super::BehaviorContext`] is present. Runs a
//! randomized sequence of scrolls, mouse movement, hovers, back/forward
//! navigation, and (bounded) extra-tab visits, returning an ordered trace.

use std::time::{Duration, Instant};

use chromiumoxide::browser::Browser;
use chromiumoxide::Page;
use rand::Rng;

use crate::config::types::BehaviorConfig;
use crate::error::CrawlError;

use super::{BehaviorAction, BehaviorContext};

pub struct BehaviorController<'a> {
    config: &'a BehaviorConfig,
}

impl<'a> BehaviorController<'a> {
    pub fn new(config: &'a BehaviorConfig) -> Self {
        Self { config }
    }

    /// Runs the randomized behavior sequence against `page`, returning the
    /// trace of actions performed. `browser` is needed only to open extra
    /// tabs (§4.5's bounded additional-product-card visits).
    pub async fn run(
        &self,
        browser: &Browser,
        page: &Page,
        ctx: &BehaviorContext,
    ) -> Result<Vec<BehaviorAction>, CrawlError> {
        let mut trace = Vec::new();

        self.scroll(page, ctx, &mut trace).await?;
        self.move_mouse(page, &mut trace).await?;
        self.hover_targets(page, ctx, &mut trace).await?;

        if rand::rng().random_bool(self.config.back_forward_probability.clamp(0.0, 1.0)) {
            self.back_and_forward(page, &mut trace).await?;
        }

        if rand::rng().random_bool(self.config.visit_root_probability.clamp(0.0, 1.0)) {
            self.visit_root(page, ctx, &mut trace).await?;
        }

        if self.config.extra_products_limit > 0 {
            self.open_extra_tabs(browser, page, ctx, &mut trace).await?;
        }

        if self.config.debug {
            tracing::debug!(actions = trace.len(), "behavior trace complete");
        } else {
            tracing::debug!(actions = trace.len(), "behavior trace complete (summary)");
        }

        Ok(trace)
    }

    async fn delay(&self) {
        let ms = rand::rng().random_range(self.config.action_delay_min_ms..=self.config.action_delay_max_ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Scroll depth is uniform in `[scroll_min_depth, scroll_max_depth]`,
    /// clipped by the category's per-page override when set (§4.5, §9).
    async fn scroll(&self, page: &Page, ctx: &BehaviorContext, trace: &mut Vec<BehaviorAction>) -> Result<(), CrawlError> {
        let started = Instant::now();
        let mut lo = self.config.scroll_min_depth;
        let mut hi = self.config.scroll_max_depth;
        if let Some(min_override) = ctx.scroll_min_override {
            lo = lo.max(min_override);
        }
        if let Some(max_override) = ctx.scroll_max_override {
            hi = hi.min(max_override);
        }
        if lo > hi {
            lo = hi;
        }
        let depth = rand::rng().random_range(lo..=hi);
        let script = format!(
            "window.scrollTo({{top: document.body.scrollHeight * {depth}, behavior: 'smooth'}})"
        );
        page.evaluate(script)
            .await
            .map_err(|e| CrawlError::BehaviorError(format!("scroll: {e}")))?;
        self.delay().await;
        trace.push(BehaviorAction { name: "scroll", duration: started.elapsed() });
        Ok(())
    }

    async fn move_mouse(&self, page: &Page, trace: &mut Vec<BehaviorAction>) -> Result<(), CrawlError> {
        let started = Instant::now();
        let x: f64 = rand::rng().random_range(0.0..1200.0);
        let y: f64 = rand::rng().random_range(0.0..800.0);
        page.move_mouse((x, y).into())
            .await
            .map_err(|e| CrawlError::BehaviorError(format!("mouse_move: {e}")))?;
        self.delay().await;
        trace.push(BehaviorAction { name: "mouse_move", duration: started.elapsed() });
        Ok(())
    }

    async fn hover_targets(
        &self,
        page: &Page,
        ctx: &BehaviorContext,
        trace: &mut Vec<BehaviorAction>,
    ) -> Result<(), CrawlError> {
        let started = Instant::now();
        if let Some(selector) = ctx.category_selector.as_deref() {
            if let Ok(Some(element)) = page.find_element(selector).await.map(Some).or(Ok(None)) {
                let _ = element.hover().await;
            }
            self.delay().await;
            trace.push(BehaviorAction { name: "hover", duration: started.elapsed() });
        }
        Ok(())
    }

    /// Navigates back one entry then forward again via the page's own
    /// history, mirroring what a browsing human does when double-checking a
    /// listing (§4.5).
    async fn back_and_forward(&self, page: &Page, trace: &mut Vec<BehaviorAction>) -> Result<(), CrawlError> {
        let started = Instant::now();
        page.evaluate("window.history.back()")
            .await
            .map_err(|e| CrawlError::BehaviorError(format!("back: {e}")))?;
        let _ = page.wait_for_navigation().await;
        self.delay().await;
        page.evaluate("window.history.forward()")
            .await
            .map_err(|e| CrawlError::BehaviorError(format!("forward: {e}")))?;
        let _ = page.wait_for_navigation().await;
        self.delay().await;
        trace.push(BehaviorAction { name: "back_forward", duration: started.elapsed() });
        Ok(())
    }

    async fn visit_root(
        &self,
        page: &Page,
        ctx: &BehaviorContext,
        trace: &mut Vec<BehaviorAction>,
    ) -> Result<(), CrawlError> {
        let started = Instant::now();
        page.goto(&ctx.root_url)
            .await
            .map_err(|e| CrawlError::BehaviorError(format!("visit_root: {e}")))?;
        let _ = page.wait_for_navigation().await;
        let _ = page.goto(&ctx.category_url).await;
        let _ = page.wait_for_navigation().await;
        trace.push(BehaviorAction { name: "visit_root", duration: started.elapsed() });
        Ok(())
    }

    /// Opens up to `extra_products_limit` additional product cards (bounded
    /// further by `max_additional_chain`) from the category page in new tabs,
    /// then closes them (§4.5).
    async fn open_extra_tabs(
        &self,
        browser: &Browser,
        page: &Page,
        ctx: &BehaviorContext,
        trace: &mut Vec<BehaviorAction>,
    ) -> Result<(), CrawlError> {
        if ctx.is_product_page {
            return Ok(());
        }
        let Some(selector) = ctx.product_link_selector.as_deref() else { return Ok(()) };
        let started = Instant::now();
        let limit = self.config.extra_products_limit.min(self.config.max_additional_chain) as usize;

        let elements = page.find_elements(selector).await.unwrap_or_default();
        let Ok(base) = url::Url::parse(&ctx.base_url) else { return Ok(()) };

        let mut opened = 0usize;
        for element in elements {
            if opened >= limit {
                break;
            }
            let Ok(Some(href)) = element.attribute("href").await else { continue };
            let Ok(target) = base.join(&href) else { continue };

            match browser.new_page(target.as_str()).await {
                Ok(extra_page) => {
                    let _ = extra_page.wait_for_navigation().await;
                    self.delay().await;
                    let _ = extra_page.close().await;
                    opened += 1;
                }
                Err(e) => {
                    tracing::debug!(url = %target, error = %e, "extra tab open failed");
                }
            }
        }

        trace.push(BehaviorAction { name: "extra_tabs", duration: started.elapsed() });
        Ok(())
    }
}
