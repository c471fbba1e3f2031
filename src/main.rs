use clap::Parser;
use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;

use manga_sync::cli::{Cli, Mode};
use manga_sync::config::Config;
use manga_sync::error::SyncResult;
use manga_sync::logging;
use manga_sync::metrics::MetricsTracker;
use manga_sync::sources::{BuiltinSettings, SourceRegistry};
use manga_sync::store::open_store;
use manga_sync::sync::SyncOrchestrator;
use manga_sync::throttle::ConnectionThrottle;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init(logging::DEFAULT_LOG_CONFIG);
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("manga-sync failed: {}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> SyncResult<()> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(n) = cli.concurrency {
        cfg.sync.max_concurrent = n;
    }
    if cli.use_original_images {
        info!("Using original image URLs; page references are stored as sent by the source");
    }

    let metrics = Arc::new(MetricsTracker::new());
    let mut settings = BuiltinSettings::from_config(cfg.clone(), metrics.clone());
    if let Some(token) = &cli.auth_token {
        settings.auth_tokens.insert(cli.source.clone(), token.clone());
    }

    // unknown sources fail before any store or network I/O
    let registry = SourceRegistry::with_builtins(settings);
    let adapter = registry.get(&cli.source)?;

    let store = open_store(&cfg.database).await?;
    let throttle = Arc::new(ConnectionThrottle::new(cfg.sync.max_concurrent));
    info!(
        "Source '{}', store {:?}, max {} concurrent store operations",
        cli.source,
        cfg.database.backend,
        throttle.status().max
    );

    let orchestrator = SyncOrchestrator::new(adapter, store.clone(), throttle.clone(), cfg.sync.clone());
    let result = run_mode(&orchestrator, cli.mode()).await;

    if let Err(e) = throttle.drain_and_close(store.as_ref()).await {
        warn!("Shutdown did not complete cleanly: {}", e);
    }
    metrics.log_summary();
    result
}

async fn run_mode(orchestrator: &SyncOrchestrator, mode: Mode) -> SyncResult<()> {
    match mode {
        Mode::Crawl { start_page, end_page } => {
            orchestrator.crawl(start_page, end_page).await?;
        }
        Mode::Ingest { provider_id } => {
            orchestrator.ingest_title(&provider_id).await?;
        }
        Mode::SyncTitle { ident } => {
            let report = orchestrator.sync_title(&ident).await?;
            info!("Sync report: {}", report);
        }
        Mode::SyncAll => {
            let summary = orchestrator.sync_all().await?;
            info!(
                "Sync report: {} across {} titles ({} failed)",
                summary.report, summary.titles_synced, summary.titles_failed
            );
        }
    }
    Ok(())
}
