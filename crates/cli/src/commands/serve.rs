use anyhow::{Context, Result};
use clap::Args;
use parlay_core::{AppConfig, SystemClock};
use parlay_data::{PgFeed, PgStore};
use parlay_live::{Broadcaster, ChangeNotificationRouter, ScoreCache};
use parlay_scoring::{ParlayScoringEngine, VisibilityRuleEngine};
use parlay_web_api::{ApiServer, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Override the configured listen address (host:port)
    #[arg(long)]
    pub addr: Option<String>,

    /// Skip applying bundled migrations on startup
    #[arg(long)]
    pub skip_migrations: bool,
}

/// Runs the live service until SIGINT or SIGTERM.
///
/// # Errors
/// Returns an error if the database, the change feed or the listener cannot
/// be set up.
pub async fn run_serve(config: AppConfig, args: ServeArgs) -> Result<()> {
    let store = Arc::new(PgStore::connect(&config.database).await?);
    if !args.skip_migrations {
        store.migrate().await?;
    }

    let engine = Arc::new(ParlayScoringEngine::new(config.scoring.clone()));
    let cache = Arc::new(ScoreCache::new(store.clone(), store.clone(), engine));
    let broadcaster = Arc::new(Broadcaster::new(
        &config.broadcast,
        VisibilityRuleEngine::new(config.visibility.clone()),
        Arc::new(SystemClock),
    ));
    let router = Arc::new(ChangeNotificationRouter::new(
        store.clone(),
        store.clone(),
        cache.clone(),
        broadcaster.clone(),
        &config.feed,
        Duration::from_millis(config.broadcast.self_write_ttl_ms),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Subscribe before backfilling so no change lands between the two.
    let feed = PgFeed::new(store.pool().clone(), config.feed.channel_capacity);
    let mut tasks = router
        .spawn_workers(&feed, shutdown_rx.clone())
        .await
        .context("subscribing to the change feed")?;
    cache.backfill().await?;
    tasks.push(broadcaster.spawn_keep_alive(shutdown_rx.clone()));

    let addr = args.addr.unwrap_or_else(|| config.server.addr());
    let server = ApiServer::new(AppState::new(cache, broadcaster));
    let server_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(&addr, server_shutdown).await {
            tracing::error!("Server error: {}", e);
        }
    });

    wait_for_signal().await?;
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("background task failed: {}", e);
        }
    }
    if let Err(e) = server_handle.await {
        tracing::error!("server task failed: {}", e);
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
    }
    Ok(())
}
