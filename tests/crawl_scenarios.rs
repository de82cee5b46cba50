//! End-to-end scenarios against a mock fetch engine and the CSV sheet mock.
//! Covers the numbered-pagination, dedupe, and resume-after-crash properties.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use product_crawler::config::types::{
    EngineKind, NormalizedSelectors, PaginationConfig, PaginationMode, SiteConfig, SiteLimits,
};
use product_crawler::crawler::{CrawlOutcome, SiteCrawler};
use product_crawler::engine::http::HttpEngine;
use product_crawler::engine::{EngineRequest, FetchEngine, FetchResult};
use product_crawler::error::CrawlError;
use product_crawler::proxy_pool::ProxyPool;
use product_crawler::run_context::RunContext;
use product_crawler::sheets::backend::{CsvSheetsBackend, SheetsBackend};
use product_crawler::sheets::{SheetsWriter, PRODUCT_TAB_HEADER, PRODUCT_URL_COLUMN};
use product_crawler::state_store::{CategoryState, StateStore};

/// Serves canned HTML keyed by exact URL; records nothing beyond that map.
struct MockFetchEngine {
    pages: HashMap<String, String>,
}

impl MockFetchEngine {
    fn new(pages: &[(&str, &str)]) -> Arc<dyn FetchEngine> {
        Arc::new(Self { pages: pages.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect() })
    }
}

#[async_trait]
impl FetchEngine for MockFetchEngine {
    async fn fetch(&self, request: EngineRequest) -> Result<FetchResult, CrawlError> {
        let html = self.pages.get(&request.url).cloned().unwrap_or_default();
        Ok(FetchResult {
            final_url: request.url.clone(),
            html,
            status: 200,
            egress_used: "direct".to_string(),
            stopped: false,
            behavior_trace: None,
        })
    }
}

fn numbered_pages_site(param_name: &str) -> SiteConfig {
    SiteConfig {
        name: "site-a".to_string(),
        domain: "x.ru".to_string(),
        base_url: "https://x.ru/".to_string(),
        engine: EngineKind::Http,
        wait_conditions: Vec::new(),
        stop_conditions: Vec::new(),
        selectors: NormalizedSelectors {
            product_link_selector: "a.product".to_string(),
            ..Default::default()
        },
        pagination: PaginationConfig {
            mode: PaginationMode::NumberedPages,
            param_name: Some(param_name.to_string()),
            max_pages: None,
            start_page: None,
            end_page: None,
            scroll_min_depth: None,
            scroll_max_depth: None,
        },
        limits: SiteLimits::default(),
        category_urls: vec!["https://x.ru/cat".to_string()],
        category_labels: HashMap::new(),
    }
}

fn product_page(name: &str) -> String {
    format!(r#"<html><body><h1>{name}</h1><p>description of {name}</p></body></html>"#)
}

async fn test_crawler(
    site: SiteConfig,
    engine: Arc<dyn FetchEngine>,
    sheets_dir: &std::path::Path,
    image_dir: &std::path::Path,
    skipped_log: &std::path::Path,
    state_store: Arc<StateStore>,
    resume: bool,
) -> (SiteCrawler, Arc<SheetsWriter>) {
    let proxy_pool = Arc::new(ProxyPool::new(&[], true, None));
    let http_engine = Arc::new(HttpEngine::new(
        proxy_pool,
        vec!["test-agent".to_string()],
        "en-US".to_string(),
        Duration::from_secs(5),
        vec![1],
    ));

    let backend: Arc<dyn SheetsBackend> = Arc::new(CsvSheetsBackend::new(sheets_dir));
    let writer = Arc::new(SheetsWriter::new(backend, 1, "_state", "_runs"));
    writer.ensure_ambient_tabs().await.unwrap();

    let run_context = Arc::new(RunContext::new("run-test", None, None));

    let crawler = SiteCrawler {
        site,
        category_engine: engine.clone(),
        product_engine: engine,
        http_engine,
        dedupe_param_blacklist: vec!["utm_*".to_string()],
        image_dir: image_dir.to_path_buf(),
        page_delay_sec: (0.0, 0.0),
        product_delay_sec: (0.0, 0.0),
        state_store,
        writer: writer.clone(),
        run_context,
        resume,
        skipped_log_path: skipped_log.to_path_buf(),
    };
    (crawler, writer)
}

#[tokio::test]
async fn numbered_pagination_commits_every_product_in_page_order() {
    let pages = [
        ("https://x.ru/cat?page=1", r#"<html><body><a class="product" href="https://x.ru/p1">P1</a><a class="product" href="https://x.ru/p2">P2</a></body></html>"#),
        ("https://x.ru/cat?page=2", r#"<html><body><a class="product" href="https://x.ru/p3">P3</a></body></html>"#),
        ("https://x.ru/cat?page=3", r#"<html><body></body></html>"#),
        ("https://x.ru/p1", &product_page("P1")),
        ("https://x.ru/p2", &product_page("P2")),
        ("https://x.ru/p3", &product_page("P3")),
    ];
    let engine = MockFetchEngine::new(&pages);

    let sheets_dir = tempfile::tempdir().unwrap();
    let image_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    let skipped_log = state_dir.path().join("skipped_products.log");
    let state_store = Arc::new(StateStore::connect(&state_dir.path().join("state.db")).await.unwrap());

    let (crawler, writer) = test_crawler(
        numbered_pages_site("page"),
        engine,
        sheets_dir.path(),
        image_dir.path(),
        &skipped_log,
        state_store.clone(),
        true,
    )
    .await;

    let outcome = crawler.run_category("https://x.ru/cat").await.unwrap();
    assert_eq!(outcome, CrawlOutcome::Done);

    writer.flush_all("x.ru").await.unwrap();
    let backend: Arc<dyn SheetsBackend> = Arc::new(CsvSheetsBackend::new(sheets_dir.path()));
    backend.ensure_tab("x.ru", PRODUCT_TAB_HEADER).await.unwrap();
    let urls = backend.read_column("x.ru", PRODUCT_URL_COLUMN).await.unwrap();
    assert_eq!(urls, vec!["https://x.ru/p1", "https://x.ru/p2", "https://x.ru/p3"]);

    let state = state_store.get("site-a", "https://x.ru/cat").await.unwrap().unwrap();
    assert_eq!(state.last_page, 2);
    assert_eq!(state.last_product_count, 3);
}

#[tokio::test]
async fn duplicate_product_links_under_blacklisted_params_collapse_to_one_row() {
    let pages = [
        (
            "https://x.ru/cat?page=1",
            r#"<html><body><a class="product" href="https://x.ru/a?utm_source=fb">A</a><a class="product" href="https://x.ru/a">A again</a></body></html>"#,
        ),
        ("https://x.ru/cat?page=2", r#"<html><body></body></html>"#),
        ("https://x.ru/a", &product_page("A")),
    ];
    let engine = MockFetchEngine::new(&pages);

    let sheets_dir = tempfile::tempdir().unwrap();
    let image_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    let skipped_log = state_dir.path().join("skipped_products.log");
    let state_store = Arc::new(StateStore::connect(&state_dir.path().join("state.db")).await.unwrap());

    let (crawler, writer) = test_crawler(
        numbered_pages_site("page"),
        engine,
        sheets_dir.path(),
        image_dir.path(),
        &skipped_log,
        state_store,
        true,
    )
    .await;

    crawler.run_category("https://x.ru/cat").await.unwrap();
    writer.flush_all("x.ru").await.unwrap();

    let backend: Arc<dyn SheetsBackend> = Arc::new(CsvSheetsBackend::new(sheets_dir.path()));
    backend.ensure_tab("x.ru", PRODUCT_TAB_HEADER).await.unwrap();
    let urls = backend.read_column("x.ru", PRODUCT_URL_COLUMN).await.unwrap();
    assert_eq!(urls, vec!["https://x.ru/a"]);
}

#[tokio::test]
async fn resume_after_crash_skips_already_committed_product_and_continues() {
    let pages = [
        (
            "https://x.ru/cat?page=1",
            r#"<html><body><a class="product" href="https://x.ru/p1">P1</a><a class="product" href="https://x.ru/p2">P2</a></body></html>"#,
        ),
        ("https://x.ru/cat?page=2", r#"<html><body><a class="product" href="https://x.ru/p3">P3</a></body></html>"#),
        ("https://x.ru/cat?page=3", r#"<html><body></body></html>"#),
        ("https://x.ru/p1", &product_page("P1")),
        ("https://x.ru/p2", &product_page("P2")),
        ("https://x.ru/p3", &product_page("P3")),
    ];
    let engine = MockFetchEngine::new(&pages);

    let sheets_dir = tempfile::tempdir().unwrap();
    let image_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    let skipped_log = state_dir.path().join("skipped_products.log");
    let state_store = Arc::new(StateStore::connect(&state_dir.path().join("state.db")).await.unwrap());

    // Prior run already committed P1 on page 1 and crashed before committing the rest.
    let seed_backend = CsvSheetsBackend::new(sheets_dir.path());
    seed_backend.ensure_tab("x.ru", PRODUCT_TAB_HEADER).await.unwrap();
    seed_backend
        .append_rows(
            "x.ru",
            &[vec![
                "site-a".to_string(),
                "cat".to_string(),
                "https://x.ru/cat".to_string(),
                "https://x.ru/p1".to_string(),
            ]],
        )
        .await
        .unwrap();
    state_store
        .upsert(&CategoryState {
            site_name: "site-a".to_string(),
            category_url: "https://x.ru/cat".to_string(),
            last_page: 1,
            last_product_count: 1,
            last_run_ts: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let (crawler, writer) = test_crawler(
        numbered_pages_site("page"),
        engine,
        sheets_dir.path(),
        image_dir.path(),
        &skipped_log,
        state_store.clone(),
        true,
    )
    .await;

    let outcome = crawler.run_category("https://x.ru/cat").await.unwrap();
    assert_eq!(outcome, CrawlOutcome::Done);
    writer.flush_all("x.ru").await.unwrap();

    let backend: Arc<dyn SheetsBackend> = Arc::new(CsvSheetsBackend::new(sheets_dir.path()));
    backend.ensure_tab("x.ru", PRODUCT_TAB_HEADER).await.unwrap();
    let urls = backend.read_column("x.ru", PRODUCT_URL_COLUMN).await.unwrap();
    assert_eq!(urls, vec!["https://x.ru/p1", "https://x.ru/p2", "https://x.ru/p3"]);
    assert_eq!(urls.len(), 3, "no duplicate row for the already-committed P1");

    let state = state_store.get("site-a", "https://x.ru/cat").await.unwrap().unwrap();
    assert_eq!(state.last_page, 2);
    assert_eq!(state.last_product_count, 3);
}
