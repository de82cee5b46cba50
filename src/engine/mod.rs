//! Fetch layer: a capability shared by the HTTP and browser engines (§9,
//! "Engine polymorphism: ... model as a capability set, not inheritance").

pub mod behavior;
pub mod browser;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::types::{StopCondition, WaitCondition};
use crate::error::CrawlError;

/// Context threaded down from the site crawler so the human-behavior
/// controller never reaches for hidden globals (§9, "Behavior controller
/// coupling").
#[derive(Debug, Clone)]
pub struct BehaviorContext {
    pub category_selector: Option<String>,
    pub category_url: String,
    pub base_url: String,
    pub root_url: String,
    pub is_product_page: bool,
    /// Selector used to find more product cards to open in extra tabs
    /// (§4.5); only meaningful on category pages.
    pub product_link_selector: Option<String>,
    /// Per-page override of the global scroll-depth range (§4.5, §9).
    pub scroll_min_override: Option<f64>,
    pub scroll_max_override: Option<f64>,
}

/// A single fetch request, opaque to the caller about which engine serves it.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub url: String,
    pub wait_conditions: Vec<WaitCondition>,
    pub stop_conditions: Vec<StopCondition>,
    pub behavior_context: Option<BehaviorContext>,
}

impl EngineRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            wait_conditions: Vec::new(),
            stop_conditions: Vec::new(),
            behavior_context: None,
        }
    }
}

/// One recorded human-behavior action (§4.5).
#[derive(Debug, Clone)]
pub struct BehaviorAction {
    pub name: &'static str,
    pub duration: Duration,
}

/// The result of a successful fetch (§3).
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub final_url: String,
    pub html: String,
    pub status: u16,
    pub egress_used: String,
    pub stopped: bool,
    pub behavior_trace: Option<Vec<BehaviorAction>>,
}

/// The capability both engines implement; the content fetcher and image saver
/// depend on this trait, never on a concrete engine.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    async fn fetch(&self, request: EngineRequest) -> Result<FetchResult, CrawlError>;
}
