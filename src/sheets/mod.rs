//! Spreadsheet writer (C10, §4.10) and its backend contract (§6.3).

pub mod backend;
pub mod writer;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use backend::{CsvSheetsBackend, NoopSheetsBackend, SheetsBackend};
pub use writer::SheetsWriter;

/// One row destined for a per-domain tab (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub source_site: String,
    pub category: String,
    pub category_url: String,
    pub product_url: String,
    pub product_content: String,
    pub discovered_at: DateTime<Utc>,
    pub run_id: String,
    pub product_id_hash: String,
    pub page_num: u32,
    pub metadata: HashMap<String, String>,
    pub image_path: String,
    pub name_en: Option<String>,
    pub name_ru: Option<String>,
    pub price_without_discount: Option<String>,
    pub price_with_discount: Option<String>,
    pub status: String,
    pub note: String,
    pub processed_at: DateTime<Utc>,
    pub llm_raw: String,
}

impl ProductRecord {
    /// Renders the row in the exact column order of §6.4.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.source_site.clone(),
            self.category.clone(),
            self.category_url.clone(),
            self.product_url.clone(),
            self.product_content.clone(),
            self.discovered_at.to_rfc3339(),
            self.run_id.clone(),
            self.product_id_hash.clone(),
            self.page_num.to_string(),
            serde_json::to_string(&self.metadata).unwrap_or_default(),
            self.image_path.clone(),
            self.name_en.clone().unwrap_or_default(),
            self.name_ru.clone().unwrap_or_default(),
            self.price_without_discount.clone().unwrap_or_default(),
            self.price_with_discount.clone().unwrap_or_default(),
            self.status.clone(),
            self.note.clone(),
            self.processed_at.to_rfc3339(),
            self.llm_raw.clone(),
        ]
    }
}

pub const PRODUCT_TAB_HEADER: &[&str] = &[
    "source_site",
    "category",
    "category_url",
    "product_url",
    "product_content",
    "discovered_at",
    "run_id",
    "product_id_hash",
    "page_num",
    "metadata",
    "image_path",
    "name (en)",
    "name (ru)",
    "price (without discount)",
    "price (with discount)",
    "status",
    "note",
    "processed_at",
    "llm_raw",
];

pub const STATE_TAB_HEADER: &[&str] =
    &["site_name", "category_url", "last_page", "last_product_count", "last_run_ts"];

pub const RUNS_TAB_HEADER: &[&str] =
    &["run_id", "site", "started_at", "finished_at", "products_total", "products_new"];

/// `product_url` lives in column D (index 3) of the per-domain tab.
pub const PRODUCT_URL_COLUMN: &str = "D";
