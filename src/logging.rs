//! `tracing` subscriber setup (A3, §4.13).
//!
//! Mirrors the donor crate's file-appender-plus-stdout layering, driven from
//! `LOG_LEVEL`/`LOG_FILE_PATH` instead of a static filter, so every propagated
//! `CrawlError` is surfaced as structured fields rather than string-interpolated
//! messages (see [`crate::error::ErrorEvent`]).

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Must be kept alive for the lifetime of the process; dropping it stops the
/// file-appender's background flush thread.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

pub fn init(log_file_path: &Path) -> anyhow::Result<LoggingGuard> {
    if let Some(parent) = log_file_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = log_file_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("parser.log"));
    let dir = log_file_path.parent().unwrap_or_else(|| Path::new("."));
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer().with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false).with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LoggingGuard { _file_guard: file_guard })
}
