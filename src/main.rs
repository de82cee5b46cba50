use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use product_crawler::cli::Cli;
use product_crawler::config::loader::{load_global_config, load_site_configs, ResolvedPaths};
use product_crawler::run_context::RunContext;
use product_crawler::runner::Runner;

fn global_config_path() -> std::path::PathBuf {
    product_crawler::config::env::env_path_or("GLOBAL_CONFIG_PATH", std::path::PathBuf::from("config/global.yaml"))
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let paths = ResolvedPaths::from_env(cli.sites_dir.as_deref());
    let _logging_guard = match product_crawler::logging::init(&paths.log_file) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            std::process::exit(2);
        }
    };

    let global = match load_global_config(&global_config_path()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration invalid");
            std::process::exit(2);
        }
    };
    let sites = match load_site_configs(&paths.site_config_dir) {
        Ok(sites) => sites,
        Err(e) => {
            tracing::error!(error = %e, "configuration invalid");
            std::process::exit(2);
        }
    };

    let run_id = cli.run_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let run_context = Arc::new(RunContext::new(
        run_id,
        global.runtime.stop_after_products,
        global.runtime.stop_after_minutes,
    ));

    let cancelled = Arc::new(AtomicBool::new(false));
    let cancel_watcher = cancelled.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received interrupt, finishing in-flight work before exit");
            cancel_watcher.store(true, Ordering::SeqCst);
        }
    });

    let runner = Runner {
        global,
        sites,
        resume: cli.resume_enabled(),
        reset_state: cli.reset_state,
        dry_run: cli.dry_run,
        paths,
        run_context,
    };

    match runner.run(cancelled).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "unrecoverable runtime error");
            std::process::exit(3);
        }
    }
}
