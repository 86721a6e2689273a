//! Windowed price aggregates over stored ticks.
//!
//! ```text
//! query ──▶ ResultCache ──hit──▶ value
//!               │ miss
//!               ▼
//!           TickStore::query_range ──▶ calculate ──▶ value
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::cache::{CacheKey, ResultCache, AVERAGE_24H_TTL};
use crate::data_sources::normalize_symbol;
use crate::error::QueryError;
use crate::store::{PricePoint, TickStore};

mod calculate;
pub mod window;

pub use calculate::{
    calculate_average, calculate_sma, mean, sort_chronologically, CalculationError,
};
pub use window::{Period, WindowQuery};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Answers 24h-average and SMA queries. Cheap to clone.
#[derive(Clone)]
pub struct PriceService {
    store: Arc<dyn TickStore>,
    cache: Arc<dyn ResultCache>,
    query_timeout: Duration,
}

impl PriceService {
    pub fn new(
        store: Arc<dyn TickStore>,
        cache: Arc<dyn ResultCache>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            query_timeout,
        }
    }

    /// Mean price over `[now - 24h, now]`, served from cache for up to
    /// ten minutes. Cache failures are logged and bypassed.
    pub async fn average_24h(&self, symbol: &str) -> Result<Decimal, QueryError> {
        let symbol = validated_symbol(symbol)?;
        let key = CacheKey::average_24h(&symbol);

        match self.cache.get(&key).await {
            Ok(Some(value)) => {
                debug!(%key, "Cache hit");
                return Ok(value);
            }
            Ok(None) => debug!(%key, "Cache miss"),
            Err(error) => warn!(%key, %error, "Cache read failed, computing directly"),
        }

        let value = self.compute_average_24h(&symbol, Utc::now()).await?;

        if let Err(error) = self.cache.put(key.clone(), value, AVERAGE_24H_TTL).await {
            warn!(%key, %error, "Cache write failed");
        }

        Ok(value)
    }

    /// Uncached 24h average as of `now`.
    pub async fn compute_average_24h(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<Decimal, QueryError> {
        let symbol = validated_symbol(symbol)?;
        let query = WindowQuery::trailing_24h(&symbol);
        let points = self.read_window(&query, now).await?;

        calculate_average(points).map_err(|error| query_error(error, symbol))
    }

    /// Mean of the last `sample_count` ticks in
    /// `[anchor - period * sample_count, anchor]`. `anchor` defaults to now.
    /// The period token and count are validated before the store is read.
    pub async fn simple_moving_average(
        &self,
        symbol: &str,
        sample_count: u32,
        period: &str,
        anchor: Option<DateTime<Utc>>,
    ) -> Result<Decimal, QueryError> {
        let period: Period = period.parse()?;
        if sample_count == 0 {
            return Err(QueryError::InvalidSampleCount);
        }
        let symbol = validated_symbol(symbol)?;
        let anchor = anchor.unwrap_or_else(Utc::now);

        let query = WindowQuery::Sampled {
            symbol: symbol.clone(),
            sample_count,
            period,
            anchor,
        };
        let points = self.read_window(&query, anchor).await?;

        calculate_sma(points, sample_count as usize).map_err(|error| query_error(error, symbol))
    }

    async fn read_window(
        &self,
        query: &WindowQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, QueryError> {
        let (from, to) = query.bounds(now);
        let read = self.store.query_range(query.symbol(), from, to);

        match tokio::time::timeout(self.query_timeout, read).await {
            Ok(points) => Ok(points?),
            Err(_) => Err(QueryError::StoreUnavailable {
                timeout_ms: self.query_timeout.as_millis() as u64,
            }),
        }
    }
}

fn query_error(error: CalculationError, symbol: String) -> QueryError {
    match error {
        CalculationError::Empty => QueryError::DataNotFound { symbol },
        CalculationError::Insufficient { required, found } => QueryError::InsufficientData {
            required: u32::try_from(required).unwrap_or(u32::MAX),
            found,
        },
        CalculationError::Overflow { count } => QueryError::ValueOutOfRange { symbol, count },
    }
}

fn validated_symbol(symbol: &str) -> Result<String, QueryError> {
    let symbol = normalize_symbol(symbol);
    if symbol.is_empty() {
        return Err(QueryError::InvalidSymbol);
    }
    Ok(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, MemoryResultCache};
    use crate::data_sources::Tick;
    use crate::store::{MemoryTickStore, StoreError};
    use async_trait::async_trait;
    use chrono::TimeDelta;

    struct StalledStore;

    #[async_trait]
    impl TickStore for StalledStore {
        async fn append(&self, _tick: &Tick) -> Result<(), StoreError> {
            Ok(())
        }

        async fn query_range(
            &self,
            _symbol: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<PricePoint>, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl ResultCache for BrokenCache {
        async fn get(&self, _key: &CacheKey) -> Result<Option<Decimal>, CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }

        async fn put(&self, _: CacheKey, _: Decimal, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }
    }

    async fn seeded(prices: &[(i64, i64)]) -> Arc<MemoryTickStore> {
        let store = Arc::new(MemoryTickStore::new());
        let now = Utc::now();
        for (minutes_ago, price) in prices {
            let tick = Tick::new(
                "BTCUSDT",
                Decimal::from(*price),
                now - TimeDelta::minutes(*minutes_ago),
            );
            store.append(&tick).await.unwrap();
        }
        store
    }

    fn service(store: Arc<dyn TickStore>, cache: Arc<dyn ResultCache>) -> PriceService {
        PriceService::new(store, cache, DEFAULT_QUERY_TIMEOUT)
    }

    #[tokio::test]
    async fn average_24h_normalizes_symbol() {
        let store = seeded(&[(30, 10), (20, 20), (10, 30)]).await;
        let service = service(store, Arc::new(MemoryResultCache::new()));

        let value = service.average_24h(" btcusdt ").await.unwrap();
        assert_eq!(value, Decimal::from(20));
    }

    #[tokio::test]
    async fn average_24h_excludes_older_ticks() {
        let store = seeded(&[(25 * 60, 1000), (60, 10), (1, 20)]).await;
        let service = service(store, Arc::new(MemoryResultCache::new()));

        let value = service.average_24h("BTCUSDT").await.unwrap();
        assert_eq!(value, Decimal::from(15));
    }

    #[tokio::test]
    async fn empty_window_is_not_found_and_not_cached() {
        let cache = Arc::new(MemoryResultCache::new());
        let service = service(Arc::new(MemoryTickStore::new()), cache.clone());

        let error = service.average_24h("ETHUSDT").await.unwrap_err();
        assert!(matches!(error, QueryError::DataNotFound { ref symbol } if symbol == "ETHUSDT"));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn blank_symbol_is_rejected() {
        let service = service(
            Arc::new(MemoryTickStore::new()),
            Arc::new(MemoryResultCache::new()),
        );
        let error = service.average_24h("   ").await.unwrap_err();
        assert_eq!(error.code(), crate::error::ErrorCode::InvalidSymbol);
    }

    #[tokio::test]
    async fn broken_cache_is_bypassed() {
        let store = seeded(&[(5, 4), (4, 6)]).await;
        let service = service(store, Arc::new(BrokenCache));

        assert_eq!(service.average_24h("BTCUSDT").await.unwrap(), Decimal::from(5));
    }

    #[tokio::test]
    async fn sma_validates_before_reading() {
        let service = service(Arc::new(StalledStore), Arc::new(MemoryResultCache::new()));

        let error = service
            .simple_moving_average("BTCUSDT", 3, "2h", None)
            .await
            .unwrap_err();
        assert!(matches!(error, QueryError::InvalidPeriod(ref token) if token == "2h"));

        let error = service
            .simple_moving_average("BTCUSDT", 0, "1m", None)
            .await
            .unwrap_err();
        assert!(matches!(error, QueryError::InvalidSampleCount));
    }

    #[tokio::test]
    async fn sma_averages_last_n_samples() {
        let store = seeded(&[(5, 1), (4, 2), (3, 3), (2, 4), (1, 5)]).await;
        let service = service(store, Arc::new(MemoryResultCache::new()));

        let value = service
            .simple_moving_average("BTCUSDT", 3, "5m", None)
            .await
            .unwrap();
        assert_eq!(value, Decimal::from(4));
    }

    #[tokio::test]
    async fn sma_reports_insufficient_samples() {
        let store = seeded(&[(30, 1), (2, 2)]).await;
        let service = service(store, Arc::new(MemoryResultCache::new()));

        // 3 * 1m window only reaches back to the tick 2 minutes ago
        let error = service
            .simple_moving_average("BTCUSDT", 3, "1m", None)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            QueryError::InsufficientData {
                required: 3,
                found: 1
            }
        ));
    }

    #[tokio::test]
    async fn sma_respects_explicit_anchor() {
        let store = seeded(&[(120, 10), (100, 20), (90, 30), (1, 1000)]).await;
        let service = service(store, Arc::new(MemoryResultCache::new()));
        let anchor = Utc::now() - TimeDelta::minutes(80);

        let value = service
            .simple_moving_average("BTCUSDT", 2, "30m", Some(anchor))
            .await
            .unwrap();
        assert_eq!(value, Decimal::from(25));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_times_out() {
        let service = service(Arc::new(StalledStore), Arc::new(MemoryResultCache::new()));

        let error = service.average_24h("BTCUSDT").await.unwrap_err();
        assert!(matches!(error, QueryError::StoreUnavailable { timeout_ms: 5000 }));
        assert!(!error.is_client_error());
    }

    #[tokio::test]
    async fn out_of_range_sum_is_an_error_not_a_panic() {
        let store = Arc::new(MemoryTickStore::new());
        let huge = crate::decimal::parse_price("50000000000000000000000000000").unwrap();
        let now = Utc::now();
        for minutes_ago in [2, 1] {
            let tick = Tick::new("BTCUSDT", huge, now - TimeDelta::minutes(minutes_ago));
            store.append(&tick).await.unwrap();
        }
        let cache = Arc::new(MemoryResultCache::new());
        let service = service(store, cache.clone());

        let error = service.average_24h("BTCUSDT").await.unwrap_err();
        assert!(matches!(
            error,
            QueryError::ValueOutOfRange { ref symbol, count: 2 } if symbol == "BTCUSDT"
        ));
        assert!(cache.is_empty().await);

        let error = service
            .simple_moving_average("BTCUSDT", 2, "5m", None)
            .await
            .unwrap_err();
        assert_eq!(error.code(), crate::error::ErrorCode::ValueOutOfRange);
    }
}
