use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{PricePoint, StoreError, TickStore};
use crate::data_sources::Tick;

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTickStore {
    series: RwLock<HashMap<String, Vec<PricePoint>>>,
}

impl MemoryTickStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, symbol: &str) -> usize {
        self.series
            .read()
            .await
            .get(symbol)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl TickStore for MemoryTickStore {
    async fn append(&self, tick: &Tick) -> Result<(), StoreError> {
        let mut series = self.series.write().await;
        series
            .entry(tick.symbol.clone())
            .or_default()
            .push(PricePoint::from(tick));
        Ok(())
    }

    async fn query_range(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let series = self.series.read().await;
        let mut points: Vec<PricePoint> = series
            .get(symbol)
            .map(|points| {
                points
                    .iter()
                    .filter(|point| point.observed_at >= from && point.observed_at <= to)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        // appends are in receipt order, which is not always time order
        points.sort_by_key(|point| point.observed_at);
        Ok(points)
    }
}
