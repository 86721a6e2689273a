use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use price_aggregator_server::averages::PriceService;
use price_aggregator_server::cache::MemoryResultCache;
use price_aggregator_server::config::Config;
use price_aggregator_server::store::{MemoryTickStore, SqliteTickStore, TickStore};
use price_aggregator_server::{api, ingestion};

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let store: Arc<dyn TickStore> = match &config.database_path {
        Some(path) => Arc::new(SqliteTickStore::open(path)?),
        None => {
            warn!("DATABASE_PATH not set, ticks are kept in memory only");
            Arc::new(MemoryTickStore::new())
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    cancel.cancel();
                }
                Err(error) => warn!(%error, "Unable to listen for shutdown signal"),
            }
        });
    }

    let ingestion = ingestion::spawn(
        &config.feed,
        Arc::clone(&store),
        config.ingestion.clone(),
        &cancel,
    )?;

    let cache = MemoryResultCache::new();
    let sweeper = cache.spawn_sweeper(CACHE_SWEEP_INTERVAL, cancel.clone());

    let service = PriceService::new(store, Arc::new(cache), config.query_timeout);
    let served = api::serve(service, config.port, cancel.clone()).await;

    // the API can also exit on a bind error, so stop everything else too
    cancel.cancel();
    if let Some(stats) = ingestion.shutdown(config.ingestion.shutdown_timeout).await {
        info!(?stats, "Ingestion stopped");
    }
    let _ = sweeper.await;

    served
}
