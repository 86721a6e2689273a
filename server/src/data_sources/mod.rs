use std::time::Duration;

use tokio_util::sync::CancellationToken;

// Unified output data format
pub mod output_data_format;
pub use output_data_format::{normalize_symbol, ConnectionState, FeedEvent, Tick};

// Exchanges
mod binance;
pub use binance::{
    decode_frame, ticker_stream_url, BinanceTickerMessage, BinanceTickerSource,
    BINANCE_API_BASE_URL, BINANCE_RECONNECTION_FREQUENCY_SECONDS, DEFAULT_SYMBOLS,
};

use crate::retry::Backoff;

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub base_url: String,
    /// Exchange symbols, any case.
    pub symbols: Vec<String>,
    /// Capacity of the feed channel. A full channel pauses socket reads.
    pub buffer: usize,
    pub backoff: Backoff,
    pub connection_age_limit: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_API_BASE_URL.to_string(),
            symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            buffer: 1024,
            backoff: Backoff::default(),
            connection_age_limit: Duration::from_secs(BINANCE_RECONNECTION_FREQUENCY_SECONDS),
        }
    }
}

/// Starts the feed adapter and returns the receiving end of its events.
/// The adapter stops when `cancel` fires or the receiver is dropped.
pub fn get_feed_rx(
    config: &FeedConfig,
    cancel: CancellationToken,
) -> Result<(flume::Receiver<FeedEvent>, tokio::task::JoinHandle<()>), url::ParseError> {
    let (tx, rx) = flume::bounded::<FeedEvent>(config.buffer.max(1));

    let source = BinanceTickerSource::from_config(config)?;
    let handle = source.spawn(tx, cancel);

    Ok((rx, handle))
}
