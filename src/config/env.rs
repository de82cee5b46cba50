//! Environment-driven defaults (§6.2).
//!
//! `APP_RUN_ENV` selects a table of default filesystem paths; individual
//! `NETWORK_*`/`STATE_*`/... variables, when set, override values already
//! loaded from the config files. Only the overlay keys actually recognized by
//! this crate are listed here; anything else is ignored.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnv {
    Local,
    Docker,
}

impl RunEnv {
    pub fn from_env() -> Self {
        match env::var("APP_RUN_ENV").as_deref() {
            Ok("docker") => Self::Docker,
            _ => Self::Local,
        }
    }

    pub fn default_state_db(self) -> PathBuf {
        match self {
            Self::Local => PathBuf::from("state/runtime.db"),
            Self::Docker => PathBuf::from("/var/app/state/runtime.db"),
        }
    }

    pub fn default_image_dir(self) -> PathBuf {
        match self {
            Self::Local => PathBuf::from("assets/images"),
            Self::Docker => PathBuf::from("/app/assets/images"),
        }
    }

    pub fn default_site_config_dir(self) -> PathBuf {
        match self {
            Self::Local => PathBuf::from("config/sites"),
            Self::Docker => PathBuf::from("/app/config/sites"),
        }
    }

    pub fn default_secrets_dir(self) -> PathBuf {
        match self {
            Self::Local => PathBuf::from("secrets/"),
            Self::Docker => PathBuf::from("/secrets/"),
        }
    }

    pub fn default_log_file(self) -> PathBuf {
        match self {
            Self::Local => PathBuf::from("logs/parser.log"),
            Self::Docker => PathBuf::from("/var/log/parser/parser.log"),
        }
    }

    pub fn default_bad_egress_log(self) -> PathBuf {
        match self {
            Self::Local => PathBuf::from("logs/bad_proxies.log"),
            Self::Docker => PathBuf::from("/var/log/parser/bad_proxies.log"),
        }
    }
}

/// Reads a path-valued environment variable, falling back to `default` when unset.
pub fn env_path_or(key: &str, default: PathBuf) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or(default)
}

pub fn env_string_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

pub fn env_usize_or(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
