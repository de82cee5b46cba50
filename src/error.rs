//! Central error types shared across the crawl pipeline.
//!
//! Every fallible boundary in this crate returns a [`CrawlError`] (or wraps one
//! in `anyhow::Error` at orchestration call sites). Each variant carries enough
//! context to build the structured [`ErrorEvent`] that diagnostics emit.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Error kinds produced by the crawl pipeline.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("transport error fetching {url}: {source}")]
    TransportError {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("http {code} fetching {url}")]
    HttpStatusError { url: String, code: u16 },

    #[error("page was navigating while reading content for {url}")]
    NavigationBusy { url: String },

    #[error("extraction produced no content for {url}")]
    ExtractionEmpty { url: String },

    #[error("human-behavior controller failed: {0}")]
    BehaviorError(String),

    #[error("failed to save image for {url}: {source}")]
    ImageSaveError {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to append row to sheet {tab} after {attempts} attempts: {message}")]
    SheetAppendError {
        tab: String,
        attempts: u32,
        message: String,
    },

    #[error("state store error: {0}")]
    StateStoreError(String),

    #[error("proxy pool exhausted: all egresses are quarantined")]
    ProxyPoolExhausted,
}

/// Where an error originated, for filtering structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Http,
    Browser,
    Image,
    Sheet,
    State,
    Proxy,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Http => "http",
            Self::Browser => "browser",
            Self::Image => "image",
            Self::Sheet => "sheet",
            Self::State => "state",
            Self::Proxy => "proxy",
        };
        write!(f, "{s}")
    }
}

/// Structured diagnostic record attached to every logged error (§7).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub error_type: String,
    pub error_source: ErrorSource,
    pub url: Option<String>,
    pub proxy: Option<String>,
    pub retry_index: Option<u32>,
    pub action_required: &'static str,
    pub details: HashMap<String, String>,
}

impl ErrorEvent {
    pub fn new(error_type: impl Into<String>, error_source: ErrorSource, action_required: &'static str) -> Self {
        Self {
            error_type: error_type.into(),
            error_source,
            url: None,
            proxy: None,
            retry_index: None,
            action_required,
            details: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    #[must_use]
    pub fn with_retry_index(mut self, idx: u32) -> Self {
        self.retry_index = Some(idx);
        self
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Emit this event at `warn` level as structured `tracing` fields.
    pub fn log_warn(&self) {
        tracing::warn!(
            error_type = %self.error_type,
            error_source = %self.error_source,
            url = self.url.as_deref().unwrap_or(""),
            proxy = self.proxy.as_deref().unwrap_or(""),
            retry_index = self.retry_index.unwrap_or_default(),
            action_required = self.action_required,
            "crawl error"
        );
    }

    /// Emit this event at `error` level.
    pub fn log_error(&self) {
        tracing::error!(
            error_type = %self.error_type,
            error_source = %self.error_source,
            url = self.url.as_deref().unwrap_or(""),
            proxy = self.proxy.as_deref().unwrap_or(""),
            retry_index = self.retry_index.unwrap_or_default(),
            action_required = self.action_required,
            "crawl error"
        );
    }
}

pub type CrawlResult<T> = Result<T, CrawlError>;
