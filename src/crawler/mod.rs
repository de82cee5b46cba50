//! Per-site crawl pipeline (C8, §4.8).

pub mod pagination;
pub mod site_crawler;

pub use site_crawler::{CrawlOutcome, SiteCrawler};
