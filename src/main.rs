mod api;
mod config;
mod db;
mod error;
mod ingest;
mod jobs;
mod scheduler;
mod source;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::error::Result;
use crate::jobs::{MarketScrapeJob, PlayerCountJob, RosterScrapeJob};
use crate::scheduler::{JobRegistry, Scheduler};
use crate::source::{HttpListingSource, SqliteItemResolver};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg).await?;
    info!(
        max_connections = cfg.db_max_connections,
        "Database ready at {}", cfg.db_path
    );

    // --- Jobs ---
    let registry = JobRegistry::new();
    let token = CancellationToken::new();
    let mut scheduler = Scheduler::new(Arc::clone(&registry), token.clone());

    let source = HttpListingSource::new(
        cfg.market_url.clone(),
        cfg.fetch_timeout(),
        cfg.retry_policy(),
    )?;
    let market = MarketScrapeJob::new(
        Arc::new(source),
        Arc::new(SqliteItemResolver::new(pool.clone())),
        pool.clone(),
        Duration::from_secs(cfg.market_interval_secs),
        cfg.fetch_timeout(),
    );
    scheduler.spawn(Arc::new(market));

    if cfg.players_interval_secs > 0 {
        let players = PlayerCountJob::new(
            cfg.players_url.clone(),
            cfg.retry_policy(),
            pool.clone(),
            Duration::from_secs(cfg.players_interval_secs),
            cfg.fetch_timeout(),
        )?;
        scheduler.spawn(Arc::new(players));
    } else {
        warn!("PLAYERS_INTERVAL_SECS=0: player-count sampler disabled");
    }

    if cfg.roster_interval_secs > 0 {
        let roster = RosterScrapeJob::new(
            cfg.roster_url.clone(),
            cfg.retry_policy(),
            pool.clone(),
            Duration::from_secs(cfg.roster_interval_secs),
            cfg.fetch_timeout(),
        )?;
        scheduler.spawn(Arc::new(roster));
    } else {
        warn!("ROSTER_INTERVAL_SECS=0: guild roster scraper disabled");
    }

    // --- Shutdown signal ---
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested; finishing in-flight cycles"),
            Err(e) => error!("Failed to listen for shutdown signal: {e}"),
        }
        signal_token.cancel();
    });

    // --- HTTP API server ---
    let api_state = ApiState {
        pool: pool.clone(),
        registry,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .await;

    // Stop the jobs even if the server died on its own.
    scheduler.shutdown().await;
    pool.close().await;
    info!("Shutdown complete");

    served?;
    Ok(())
}
