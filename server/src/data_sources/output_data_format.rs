use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::MessageParseError;

/// Normalized price observation, the unit the rest of the system works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Uppercase exchange symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Strictly positive last price.
    pub price: Decimal,
    /// Wall-clock time the frame was received.
    pub observed_at: DateTime<Utc>,
}

impl Tick {
    pub fn new(symbol: &str, price: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            price,
            observed_at,
        }
    }
}

pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Connection lifecycle of a feed adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal, reached on cancellation.
    Stopped,
}

/// Everything a feed adapter hands to its consumer.
#[derive(Debug)]
pub enum FeedEvent {
    State(ConnectionState),
    Tick(Tick),
    ParseFailed(MessageParseError),
}
