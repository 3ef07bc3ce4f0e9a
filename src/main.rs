use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use parlay_gate::api::{self, AppState};
use parlay_gate::config::Config;
use parlay_gate::db::{MemoryUsageStore, SqliteUsageStore, UsageStore};
use parlay_gate::feed::{CacheKey, DemoFeed, OddsApiFeed, OddsCache, OddsFeed};
use parlay_gate::quota::{spawn_retention_sweep, Clock, QuotaEngine, SystemClock, UsageLedger};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let (store, feed): (Arc<dyn UsageStore>, Arc<dyn OddsFeed>) = if config.demo {
        info!("Demo mode: demo odds feed, in-memory usage store");
        (Arc::new(MemoryUsageStore::new()), Arc::new(DemoFeed::new()))
    } else {
        let store = SqliteUsageStore::open(&config.database_path)?;
        info!("Usage store opened: {}", config.database_path);
        let api_key = config.odds_api_key.clone().unwrap_or_default();
        let feed = OddsApiFeed::new(&config.odds_api_url, api_key)?;
        (Arc::new(store), Arc::new(feed))
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let periods = config
        .period_clock()
        .ok_or_else(|| anyhow::anyhow!("invalid period offset"))?;
    let ledger = UsageLedger::new(Arc::clone(&store), Arc::clone(&clock), periods);

    let admins = config.admin_policy();
    info!("{} privileged identit(ies) configured", admins.len());
    let engine = QuotaEngine::new(ledger, admins);

    let odds = OddsCache::new(feed, config.cache_config());
    info!(
        "Odds feed '{}' (ttl {}s, {} attempt(s))",
        odds.feed_name(),
        config.cache_ttl_secs,
        config.feed_max_attempts
    );

    // Warm the cross-sport key so the first request is served from cache
    {
        let odds = odds.clone();
        tokio::spawn(async move {
            odds.prefetch(&[CacheKey::all_sports()]).await;
        });
    }

    spawn_retention_sweep(
        Arc::clone(&store),
        clock,
        config.retention_policy(),
        config.retention_sweep_every(),
    );

    let app = api::router(AppState { engine, odds });
    let addr: SocketAddr = config.listen_addr.parse()?;
    info!("API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
