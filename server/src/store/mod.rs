//! Append-only time-series storage for ticks.
//!
//! The store is the only state shared between ingestion and queries, so
//! implementations must allow concurrent appends and range reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::data_sources::Tick;

mod memory;
mod sqlite;

pub use memory::MemoryTickStore;
pub use sqlite::SqliteTickStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },
}

/// One stored observation as returned by a range read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricePoint {
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl From<&Tick> for PricePoint {
    fn from(tick: &Tick) -> Self {
        Self {
            price: tick.price,
            observed_at: tick.observed_at,
        }
    }
}

#[async_trait]
pub trait TickStore: Send + Sync {
    /// Persists one tick. Stored ticks are never updated or deleted.
    async fn append(&self, tick: &Tick) -> Result<(), StoreError>;

    /// Ticks for `symbol` with `from <= observed_at <= to`, oldest first.
    async fn query_range(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, StoreError>;
}
