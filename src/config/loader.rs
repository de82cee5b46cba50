//! Loads and validates [`GlobalConfig`] and the per-site [`SiteConfig`]s (§4.12, A2).
//!
//! Validation failure is reported as [`CrawlError::ConfigInvalid`] and is the
//! only startup failure mode that should ever occur before any network or
//! state-store I/O takes place (§7: "`ConfigInvalid` aborts startup with exit
//! code 2").

use std::path::{Path, PathBuf};

use crate::config::env::{env_path_or, env_usize_or, RunEnv};
use crate::config::types::{GlobalConfig, PaginationMode, RawSiteConfig, SiteConfig};
use crate::error::CrawlError;

/// Resolved set of filesystem locations used by the runner (§6.2 default-path table).
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub state_db: PathBuf,
    pub image_dir: PathBuf,
    pub site_config_dir: PathBuf,
    pub log_file: PathBuf,
    pub bad_egress_log: PathBuf,
}

impl ResolvedPaths {
    pub fn from_env(sites_dir_flag: Option<&Path>) -> Self {
        let run_env = RunEnv::from_env();
        Self {
            state_db: env_path_or("STATE_DATABASE_PATH", run_env.default_state_db()),
            image_dir: env_path_or("PRODUCT_IMAGE_DIR", run_env.default_image_dir()),
            site_config_dir: sites_dir_flag.map(Path::to_path_buf).unwrap_or_else(|| {
                env_path_or("SITE_CONFIG_DIR", run_env.default_site_config_dir())
            }),
            log_file: env_path_or("LOG_FILE_PATH", run_env.default_log_file()),
            bad_egress_log: env_path_or(
                "NETWORK_BAD_PROXY_LOG_PATH",
                run_env.default_bad_egress_log(),
            ),
        }
    }
}

/// Loads the global configuration file, applying the few environment overrides
/// that are cheap to splice onto an already-parsed struct (write-flush interval,
/// proxy allow-direct, accept-language).
pub fn load_global_config(path: &Path) -> Result<GlobalConfig, CrawlError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| CrawlError::ConfigInvalid(format!("reading {}: {e}", path.display())))?;
    let mut config: GlobalConfig = serde_yaml::from_str(&raw)
        .map_err(|e| CrawlError::ConfigInvalid(format!("parsing {}: {e}", path.display())))?;

    if let Ok(v) = std::env::var("WRITE_FLUSH_PRODUCT_INTERVAL") {
        config.write_flush_product_interval = v.parse().ok();
    }
    if let Ok(v) = std::env::var("NETWORK_PROXY_ALLOW_DIRECT") {
        config.network.allow_direct = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = std::env::var("NETWORK_ACCEPT_LANGUAGE") {
        config.network.accept_language = v;
    }
    if let Ok(v) = std::env::var("PRODUCT_FETCH_ENGINE") {
        config.product_fetch_engine = match v.as_str() {
            "http" => Some(crate::config::types::EngineKind::Http),
            "browser" => Some(crate::config::types::EngineKind::Browser),
            _ => config.product_fetch_engine,
        };
    }

    validate_global_config(&config)?;
    Ok(config)
}

fn validate_global_config(config: &GlobalConfig) -> Result<(), CrawlError> {
    if config.sheet.spreadsheet_id.trim().is_empty() {
        return Err(CrawlError::ConfigInvalid(
            "sheet.spreadsheet_id must not be empty".to_string(),
        ));
    }
    if config.network.retry.backoff_sec.is_empty() {
        return Err(CrawlError::ConfigInvalid(
            "network.retry.backoff_sec must contain at least one delay".to_string(),
        ));
    }
    Ok(())
}

/// Loads every `*.yaml`/`*.yml`/`*.json` file directly under `dir` as a site config.
pub fn load_site_configs(dir: &Path) -> Result<Vec<SiteConfig>, CrawlError> {
    let mut configs = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CrawlError::ConfigInvalid(format!("reading {}: {e}", dir.display())))?;

    for entry in entries {
        let entry = entry
            .map_err(|e| CrawlError::ConfigInvalid(format!("listing {}: {e}", dir.display())))?;
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !matches!(ext, "yaml" | "yml" | "json") {
            continue;
        }

        let raw_text = std::fs::read_to_string(&path)
            .map_err(|e| CrawlError::ConfigInvalid(format!("reading {}: {e}", path.display())))?;
        let raw: RawSiteConfig = if ext == "json" {
            serde_json::from_str(&raw_text)
                .map_err(|e| CrawlError::ConfigInvalid(format!("parsing {}: {e}", path.display())))?
        } else {
            serde_yaml::from_str(&raw_text)
                .map_err(|e| CrawlError::ConfigInvalid(format!("parsing {}: {e}", path.display())))?
        };

        let site: SiteConfig = raw.into();
        validate_site_config(&site)?;
        configs.push(site);
    }

    if configs.is_empty() {
        return Err(CrawlError::ConfigInvalid(format!(
            "no site configs found under {}",
            dir.display()
        )));
    }

    configs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(configs)
}

fn validate_site_config(site: &SiteConfig) -> Result<(), CrawlError> {
    if site.category_urls.is_empty() {
        return Err(CrawlError::ConfigInvalid(format!(
            "site {}: category_urls must not be empty",
            site.name
        )));
    }
    if site.selectors.product_link_selector.trim().is_empty() {
        return Err(CrawlError::ConfigInvalid(format!(
            "site {}: selectors.product_link_selector must not be empty",
            site.name
        )));
    }
    match site.pagination.mode {
        PaginationMode::NumberedPages if site.pagination.param_name.is_none() => {
            return Err(CrawlError::ConfigInvalid(format!(
                "site {}: pagination.param_name is required for numbered_pages",
                site.name
            )));
        }
        PaginationMode::NextButton if site.selectors.next_button_selector.is_none() => {
            return Err(CrawlError::ConfigInvalid(format!(
                "site {}: selectors.next_button_selector is required for next_button pagination",
                site.name
            )));
        }
        _ => {}
    }
    if let (Some(start), Some(end)) = (site.pagination.start_page, site.pagination.end_page)
        && start > end
    {
        return Err(CrawlError::ConfigInvalid(format!(
            "site {}: pagination.start_page must be <= end_page",
            site.name
        )));
    }
    Ok(())
}

pub fn resolved_write_flush_interval(config: &GlobalConfig) -> usize {
    config
        .write_flush_product_interval
        .unwrap_or_else(|| env_usize_or("WRITE_FLUSH_PRODUCT_INTERVAL", config.sheet.batch_size))
}
