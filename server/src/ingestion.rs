//! Ingestion Loop: drains the feed channel into the tick store.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::data_sources::{get_feed_rx, ConnectionState, FeedConfig, FeedEvent, Tick};
use crate::error::PersistenceWriteError;
use crate::retry::RetryPolicy;
use crate::store::TickStore;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub retry: RetryPolicy,
    /// Grace period for a write still running when cancellation arrives.
    pub shutdown_timeout: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestionStats {
    pub ticks_persisted: u64,
    pub ticks_dropped: u64,
    pub parse_errors: u64,
    pub reconnects: u64,
}

enum WriteOutcome {
    Persisted,
    Failed(PersistenceWriteError),
    /// Cancelled mid-write or mid-backoff.
    Abandoned,
}

pub struct IngestionLoop {
    store: Arc<dyn TickStore>,
    config: IngestionConfig,
}

impl IngestionLoop {
    pub fn new(store: Arc<dyn TickStore>, config: IngestionConfig) -> Self {
        Self { store, config }
    }

    /// Persists ticks in receipt order until `cancel` fires, the feed
    /// reports `Stopped`, or the feed channel closes. A tick whose write
    /// keeps failing is dropped and the loop moves on.
    pub async fn run(
        &self,
        feed_rx: flume::Receiver<FeedEvent>,
        cancel: CancellationToken,
    ) -> IngestionStats {
        let mut stats = IngestionStats::default();
        let mut connected_once = false;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = feed_rx.recv_async() => match event {
                    Ok(event) => event,
                    Err(_) => {
                        info!("Feed channel closed");
                        break;
                    }
                },
            };

            match event {
                FeedEvent::Tick(tick) => match self.persist(&tick, &cancel).await {
                    WriteOutcome::Persisted => {
                        stats.ticks_persisted += 1;
                        debug!(symbol = %tick.symbol, price = %tick.price, "Tick persisted");
                    }
                    WriteOutcome::Failed(error) => {
                        stats.ticks_dropped += 1;
                        error!(%error, "Dropping tick");
                    }
                    WriteOutcome::Abandoned => {
                        stats.ticks_dropped += 1;
                        warn!(symbol = %tick.symbol, "Abandoned tick write on shutdown");
                        break;
                    }
                },
                FeedEvent::ParseFailed(error) => {
                    stats.parse_errors += 1;
                    warn!(%error, "Skipping unparsable feed frame");
                }
                FeedEvent::State(ConnectionState::Connected) => {
                    if connected_once {
                        stats.reconnects += 1;
                    }
                    connected_once = true;
                    info!(reconnects = stats.reconnects, "Feed connected");
                }
                FeedEvent::State(ConnectionState::Disconnected) => warn!("Feed disconnected"),
                FeedEvent::State(ConnectionState::Connecting) => debug!("Feed connecting"),
                FeedEvent::State(ConnectionState::Stopped) => {
                    info!("Feed stopped");
                    break;
                }
            }
        }

        info!(
            persisted = stats.ticks_persisted,
            dropped = stats.ticks_dropped,
            parse_errors = stats.parse_errors,
            reconnects = stats.reconnects,
            "Ingestion loop finished"
        );
        stats
    }

    async fn persist(&self, tick: &Tick, cancel: &CancellationToken) -> WriteOutcome {
        let retry = &self.config.retry;
        let mut retries: u32 = 0;

        loop {
            let result = match self.write_once(tick, cancel).await {
                Some(result) => result,
                None => return WriteOutcome::Abandoned,
            };

            let source = match result {
                Ok(()) => return WriteOutcome::Persisted,
                Err(source) => source,
            };

            let Some(delay) = retry.next_delay(retries) else {
                return WriteOutcome::Failed(PersistenceWriteError {
                    symbol: tick.symbol.clone(),
                    attempts: retries + 1,
                    source,
                });
            };
            retries += 1;
            warn!(
                symbol = %tick.symbol,
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                error = %source,
                "Tick write failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return WriteOutcome::Abandoned,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One append. If cancellation arrives while it runs, the write gets
    /// `shutdown_timeout` to finish; `None` means it was abandoned.
    async fn write_once(
        &self,
        tick: &Tick,
        cancel: &CancellationToken,
    ) -> Option<Result<(), crate::store::StoreError>> {
        let write = self.store.append(tick);
        tokio::pin!(write);

        tokio::select! {
            biased;
            result = &mut write => Some(result),
            _ = cancel.cancelled() => {
                tokio::time::timeout(self.config.shutdown_timeout, write).await.ok()
            }
        }
    }
}

/// Running feed adapter plus ingestion loop.
pub struct IngestionHandle {
    cancel: CancellationToken,
    source: JoinHandle<()>,
    ingestion: JoinHandle<IngestionStats>,
}

/// Starts the feed adapter and the ingestion loop as two tasks. Both stop
/// when `cancel` fires or when [`IngestionHandle::shutdown`] is called.
pub fn spawn(
    feed: &FeedConfig,
    store: Arc<dyn TickStore>,
    config: IngestionConfig,
    cancel: &CancellationToken,
) -> Result<IngestionHandle, url::ParseError> {
    let cancel = cancel.child_token();
    let (feed_rx, source) = get_feed_rx(feed, cancel.clone())?;

    let ingestion_loop = IngestionLoop::new(store, config);
    let loop_cancel = cancel.clone();
    let ingestion = tokio::spawn(async move { ingestion_loop.run(feed_rx, loop_cancel).await });

    Ok(IngestionHandle {
        cancel,
        source,
        ingestion,
    })
}

impl IngestionHandle {
    /// Cancels both tasks and waits up to `timeout` for them. Tasks still
    /// running after that are aborted and `None` is returned.
    pub async fn shutdown(self, timeout: Duration) -> Option<IngestionStats> {
        self.cancel.cancel();

        let IngestionHandle {
            source, ingestion, ..
        } = self;
        let source_abort = source.abort_handle();
        let ingestion_abort = ingestion.abort_handle();

        let joined = tokio::time::timeout(timeout, async move {
            if let Err(error) = source.await {
                warn!(%error, "Feed task ended abnormally");
            }
            ingestion.await
        })
        .await;

        match joined {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(error)) => {
                warn!(%error, "Ingestion task ended abnormally");
                None
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Ingestion shutdown timed out");
                source_abort.abort();
                ingestion_abort.abort();
                None
            }
        }
    }
}
