//! Resumable, multi-site e-commerce product-link crawler.
//!
//! See the per-module docs for the crawl pipeline (`crawler`), the dual
//! HTTP/headless-browser fetch layer (`engine`), and the ambient stack
//! (`config`, `logging`, `error`) this binary is built on.

pub mod cli;
pub mod config;
pub mod content_fetcher;
pub mod crawler;
pub mod engine;
pub mod error;
pub mod image_saver;
pub mod logging;
pub mod normalize;
pub mod proxy_pool;
pub mod run_context;
pub mod runner;
pub mod sheets;
pub mod state_store;
