//! Core configuration types for the crawl pipeline (§3).
//!
//! `SiteConfig` and `GlobalConfig` are immutable after load (see [`super::loader`]).
//! Selector fields that the source documents allow as either a single pattern or
//! an ordered fallback list are normalized at load time into `Vec<String>`, so the
//! runtime only ever sees one shape (§9, "Dynamic price/name selector fallback").

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which fetch layer a site is crawled through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Http,
    Browser,
}

/// A predicate evaluated before extraction (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitCondition {
    Selector { value: String, timeout_ms: u64 },
    Timeout { value: u64 },
}

/// A predicate evaluated after extraction that ends category traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StopCondition {
    MissingSelector { value: String },
    MaxPages { value: u32 },
}

/// Raw (pre-normalization) shape of a selector that may be given as one
/// string or an ordered fallback list. Deserialized directly from YAML/JSON,
/// then collapsed into `Vec<String>` by [`normalize_selector_list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectorOrList {
    One(String),
    List(Vec<String>),
}

/// Always-a-list shape consumed by the runtime (§9).
pub fn normalize_selector_list(raw: Option<SelectorOrList>) -> Vec<String> {
    match raw {
        None => Vec::new(),
        Some(SelectorOrList::One(s)) => vec![s],
        Some(SelectorOrList::List(v)) => v,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Selectors {
    pub product_link_selector: String,
    pub next_button_selector: Option<String>,
    pub content_drop_after: Option<Vec<String>>,
    pub hover_targets: Option<Vec<String>>,
    pub product_hover_targets: Option<Vec<String>>,
    #[serde(default)]
    pub name_en: Option<SelectorOrList>,
    #[serde(default)]
    pub name_ru: Option<SelectorOrList>,
    #[serde(default)]
    pub price_without_discount: Option<SelectorOrList>,
    #[serde(default)]
    pub price_with_discount: Option<SelectorOrList>,
}

/// Fully normalized selectors: every fallback field is `Vec<String>`.
#[derive(Debug, Clone, Default)]
pub struct NormalizedSelectors {
    pub product_link_selector: String,
    pub next_button_selector: Option<String>,
    pub content_drop_after: Vec<String>,
    pub hover_targets: Vec<String>,
    pub product_hover_targets: Vec<String>,
    pub name_en: Vec<String>,
    pub name_ru: Vec<String>,
    pub price_without_discount: Vec<String>,
    pub price_with_discount: Vec<String>,
}

impl From<Selectors> for NormalizedSelectors {
    fn from(raw: Selectors) -> Self {
        Self {
            product_link_selector: raw.product_link_selector,
            next_button_selector: raw.next_button_selector,
            content_drop_after: raw.content_drop_after.unwrap_or_default(),
            hover_targets: raw.hover_targets.unwrap_or_default(),
            product_hover_targets: raw.product_hover_targets.unwrap_or_default(),
            name_en: normalize_selector_list(raw.name_en),
            name_ru: normalize_selector_list(raw.name_ru),
            price_without_discount: normalize_selector_list(raw.price_without_discount),
            price_with_discount: normalize_selector_list(raw.price_with_discount),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMode {
    NumberedPages,
    NextButton,
    InfiniteScroll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    pub mode: PaginationMode,
    pub param_name: Option<String>,
    pub max_pages: Option<u32>,
    pub start_page: Option<u32>,
    pub end_page: Option<u32>,
    pub scroll_min_depth: Option<f64>,
    pub scroll_max_depth: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SiteLimits {
    pub max_products: Option<u64>,
    pub max_scrolls: Option<u32>,
}

/// Raw site configuration as deserialized from YAML/JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSiteConfig {
    pub name: String,
    pub domain: String,
    pub base_url: String,
    pub engine: EngineKind,
    #[serde(default)]
    pub wait_conditions: Vec<WaitCondition>,
    #[serde(default)]
    pub stop_conditions: Vec<StopCondition>,
    pub selectors: Selectors,
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub limits: SiteLimits,
    pub category_urls: Vec<String>,
    #[serde(default)]
    pub category_labels: HashMap<String, String>,
}

/// Fully normalized, immutable per-site configuration (§3).
#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub name: String,
    pub domain: String,
    pub base_url: String,
    pub engine: EngineKind,
    pub wait_conditions: Vec<WaitCondition>,
    pub stop_conditions: Vec<StopCondition>,
    pub selectors: NormalizedSelectors,
    pub pagination: PaginationConfig,
    pub limits: SiteLimits,
    pub category_urls: Vec<String>,
    pub category_labels: HashMap<String, String>,
}

impl From<RawSiteConfig> for SiteConfig {
    fn from(raw: RawSiteConfig) -> Self {
        Self {
            name: raw.name,
            domain: raw.domain,
            base_url: raw.base_url,
            engine: raw.engine,
            wait_conditions: raw.wait_conditions,
            stop_conditions: raw.stop_conditions,
            selectors: raw.selectors.into(),
            pagination: raw.pagination,
            limits: raw.limits,
            category_urls: raw.category_urls,
            category_labels: raw.category_labels,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetConfig {
    pub spreadsheet_id: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_state_tab")]
    pub state_tab: String,
    #[serde(default = "default_runs_tab")]
    pub runs_tab: String,
}

fn default_batch_size() -> usize {
    1
}
fn default_state_tab() -> String {
    "_state".to_string()
}
fn default_runs_tab() -> String {
    "_runs".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_scroll_min_depth")]
    pub scroll_min_depth: f64,
    #[serde(default = "default_scroll_max_depth")]
    pub scroll_max_depth: f64,
    #[serde(default = "default_visit_root_probability")]
    pub visit_root_probability: f64,
    #[serde(default = "default_back_forward_probability")]
    pub back_forward_probability: f64,
    #[serde(default = "default_extra_products_limit")]
    pub extra_products_limit: u32,
    #[serde(default = "default_max_additional_chain")]
    pub max_additional_chain: u32,
    #[serde(default = "default_action_delay_min_ms")]
    pub action_delay_min_ms: u64,
    #[serde(default = "default_action_delay_max_ms")]
    pub action_delay_max_ms: u64,
}

fn default_scroll_min_depth() -> f64 {
    0.2
}
fn default_scroll_max_depth() -> f64 {
    0.8
}
fn default_visit_root_probability() -> f64 {
    0.05
}
fn default_back_forward_probability() -> f64 {
    0.1
}
fn default_extra_products_limit() -> u32 {
    0
}
fn default_max_additional_chain() -> u32 {
    1
}
fn default_action_delay_min_ms() -> u64 {
    150
}
fn default_action_delay_max_ms() -> u64 {
    650
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debug: false,
            scroll_min_depth: default_scroll_min_depth(),
            scroll_max_depth: default_scroll_max_depth(),
            visit_root_probability: default_visit_root_probability(),
            back_forward_probability: default_back_forward_probability(),
            extra_products_limit: default_extra_products_limit(),
            max_additional_chain: default_max_additional_chain(),
            action_delay_min_ms: default_action_delay_min_ms(),
            action_delay_max_ms: default_action_delay_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_concurrency")]
    pub max_concurrency_per_site: usize,
    pub stop_after_products: Option<u64>,
    pub stop_after_minutes: Option<u64>,
    #[serde(default = "default_page_delay_min")]
    pub page_delay_min_sec: f64,
    #[serde(default = "default_page_delay_max")]
    pub page_delay_max_sec: f64,
    #[serde(default = "default_product_delay_min")]
    pub product_delay_min_sec: f64,
    #[serde(default = "default_product_delay_max")]
    pub product_delay_max_sec: f64,
    #[serde(default)]
    pub behavior: BehaviorConfig,
}

fn default_concurrency() -> usize {
    1
}
fn default_page_delay_min() -> f64 {
    1.0
}
fn default_page_delay_max() -> f64 {
    3.0
}
fn default_product_delay_min() -> f64 {
    0.5
}
fn default_product_delay_max() -> f64 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff")]
    pub backoff_sec: Vec<u64>,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff() -> Vec<u64> {
    vec![30, 60]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_sec: default_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
    #[serde(default)]
    pub proxies: Vec<String>,
    #[serde(default = "default_allow_direct")]
    pub allow_direct: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_sec: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default)]
    pub slow_mo_ms: u64,
    #[serde(default)]
    pub preview_before_behavior_sec: u64,
    #[serde(default)]
    pub extra_page_preview_sec: u64,
    #[serde(default)]
    pub preview_delay_sec: u64,
    pub bad_proxy_log_path: Option<PathBuf>,
    pub storage_state_path: Option<PathBuf>,
}

fn default_user_agents() -> Vec<String> {
    vec!["Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36".to_string()]
}
fn default_allow_direct() -> bool {
    true
}
fn default_request_timeout() -> u64 {
    30
}
fn default_accept_language() -> String {
    "en-US,en;q=0.9".to_string()
}
fn default_headless() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DedupeConfig {
    #[serde(default)]
    pub param_blacklist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_driver")]
    pub driver: String,
    pub database_path: PathBuf,
}

fn default_state_driver() -> String {
    "sqlite".to_string()
}

/// Top-level configuration shared by every site in the run (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub sheet: SheetConfig,
    pub runtime: RuntimeConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub dedupe: DedupeConfig,
    pub state: StateConfig,
    #[serde(default)]
    pub image_dir: Option<PathBuf>,
    #[serde(default)]
    pub product_fetch_engine: Option<EngineKind>,
    #[serde(default)]
    pub write_flush_product_interval: Option<usize>,
}
