//! Short-TTL memoization of aggregate results.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long a computed 24h average is served from cache.
pub const AVERAGE_24H_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Average24h,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub kind: QueryKind,
}

impl CacheKey {
    pub fn average_24h(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind: QueryKind::Average24h,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            QueryKind::Average24h => write!(f, "{}_24hAvgPrice", self.symbol),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Best-effort result cache. Callers treat any error as a miss.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Decimal>, CacheError>;

    async fn put(&self, key: CacheKey, value: Decimal, ttl: Duration) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    value: Decimal,
    expires_at: Instant,
}

/// In-process cache with lazy expiry: stale entries read as misses and
/// stay in memory until overwritten or swept.
#[derive(Debug, Clone, Default)]
pub struct MemoryResultCache {
    inner: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
}

impl MemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn clear_expired(&self) {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, entry| entry.expires_at > now);
        let removed = before - map.len();
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
    }

    /// Number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Periodically drops expired entries until `cancel` fires.
    pub fn spawn_sweeper(
        &self,
        every: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => cache.clear_expired().await,
                }
            }
        })
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Decimal>, CacheError> {
        let map = self.inner.read().await;
        Ok(map
            .get(key)
            .filter(|entry| Instant::now() <= entry.expires_at)
            .map(|entry| entry.value))
    }

    async fn put(&self, key: CacheKey, value: Decimal, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        self.inner
            .write()
            .await
            .insert(key, CacheEntry { value, expires_at });
        Ok(())
    }
}
