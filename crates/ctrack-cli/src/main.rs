use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ctrack_store::{BookmarkStore, CatalogStore, HttpClientConfig, HttpFetcher};
use ctrack_sync::{build_aggregator, build_solutions, RefreshScheduler, SyncConfig};
use ctrack_web::{AppState, SolutionsState};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ctrack")]
#[command(about = "Competitive programming contest tracker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one refresh cycle and print a summary.
    Sync,
    /// Refresh at startup, then serve the API with the periodic scheduler.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Sync => {
            let catalog = Arc::new(CatalogStore::new());
            let aggregator = build_aggregator(&config, catalog)?;
            let summary = aggregator.run_once().await?;
            println!(
                "refresh complete: run_id={} contests={} duplicates={} rejected={} failed_platforms={}",
                summary.run_id,
                summary.contests.len(),
                summary.duplicates_dropped,
                summary.rejected_records,
                summary.failures.len(),
            );
            for (platform, error) in &summary.failures {
                eprintln!("  {platform}: {error}");
            }
        }
        Commands::Serve => {
            let catalog = Arc::new(CatalogStore::new());
            let bookmarks = Arc::new(BookmarkStore::new());
            let aggregator = Arc::new(build_aggregator(&config, catalog.clone())?);

            let scheduler = RefreshScheduler::new(aggregator, config.refresh_interval());
            let _sched = scheduler.start().await?;

            let mut state = AppState::new(catalog, bookmarks);
            if let Some(client) = build_solutions(&config)? {
                let http = HttpFetcher::new(HttpClientConfig {
                    timeout: config.adapter_timeout(),
                    user_agent: Some(config.user_agent.clone()),
                    ..Default::default()
                })?;
                state = state.with_solutions(Arc::new(SolutionsState {
                    client,
                    http: Arc::new(http),
                }));
            }

            let port: u16 = std::env::var("CTRACK_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000);
            ctrack_web::serve(state, port).await?;
        }
    }

    Ok(())
}
