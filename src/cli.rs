//! `clap`-derived CLI entrypoint (A1, §4.11, §6.1), in the style of the
//! donor pack's `scbdb-cli`.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "product-crawler", about = "Resumable, multi-site product-link crawler")]
pub struct Cli {
    /// Run identifier; a v4 UUID is generated when omitted.
    #[arg(long)]
    pub run_id: Option<String>,

    /// Resume from persisted per-category progress (default: on).
    #[arg(long, overrides_with = "no_resume")]
    pub resume: bool,

    #[arg(long)]
    pub no_resume: bool,

    /// Purge all persisted progress before running.
    #[arg(long)]
    pub reset_state: bool,

    /// Skip every spreadsheet write; routes through the in-process CSV mock.
    #[arg(long)]
    pub dry_run: bool,

    /// Overrides `SITE_CONFIG_DIR` for this run.
    #[arg(long)]
    pub sites_dir: Option<PathBuf>,
}

impl Cli {
    pub fn resume_enabled(&self) -> bool {
        !self.no_resume
    }
}
