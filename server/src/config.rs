use std::path::PathBuf;
use std::time::Duration;

use crate::averages::DEFAULT_QUERY_TIMEOUT;
use crate::data_sources::{
    FeedConfig, BINANCE_API_BASE_URL, BINANCE_RECONNECTION_FREQUENCY_SECONDS, DEFAULT_SYMBOLS,
};
use crate::helpers::{get_env_list_or_default, get_env_var_or_default};
use crate::ingestion::{IngestionConfig, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::retry::{Backoff, RetryPolicy, DEFAULT_WRITE_RETRIES};

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// `None` keeps ticks in memory only.
    pub database_path: Option<PathBuf>,
    pub feed: FeedConfig,
    pub ingestion: IngestionConfig,
    pub query_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let database_path = get_env_var_or_default("DATABASE_PATH", String::new());
        let database_path = match database_path.trim() {
            "" => None,
            path => Some(PathBuf::from(path)),
        };

        let reconnect_base_ms = get_env_var_or_default("RECONNECT_BASE_MS", 500u64);
        let reconnect_max_ms = get_env_var_or_default("RECONNECT_MAX_MS", 30_000u64);

        let feed = FeedConfig {
            base_url: get_env_var_or_default(
                "BINANCE_API_BASE_URL",
                BINANCE_API_BASE_URL.to_string(),
            ),
            symbols: get_env_list_or_default("SYMBOLS", &DEFAULT_SYMBOLS),
            buffer: get_env_var_or_default("FEED_BUFFER", 1024usize),
            backoff: Backoff::capped(
                Duration::from_millis(reconnect_base_ms),
                Duration::from_millis(reconnect_max_ms),
            ),
            connection_age_limit: Duration::from_secs(get_env_var_or_default(
                "CONNECTION_AGE_LIMIT_SECS",
                BINANCE_RECONNECTION_FREQUENCY_SECONDS,
            )),
        };

        let ingestion = IngestionConfig {
            retry: RetryPolicy {
                max_retries: get_env_var_or_default("WRITE_MAX_RETRIES", DEFAULT_WRITE_RETRIES),
                ..RetryPolicy::default()
            },
            shutdown_timeout: Duration::from_millis(get_env_var_or_default(
                "SHUTDOWN_TIMEOUT_MS",
                DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64,
            )),
        };

        Self {
            port: get_env_var_or_default("PORT", 8080u16),
            database_path,
            feed,
            ingestion,
            query_timeout: Duration::from_millis(get_env_var_or_default(
                "QUERY_TIMEOUT_MS",
                DEFAULT_QUERY_TIMEOUT.as_millis() as u64,
            )),
        }
    }
}
