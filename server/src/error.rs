//! Error taxonomy.
//!
//! Ingestion-side errors (`ConnectionError`, `MessageParseError`,
//! `PersistenceWriteError`) are handled where they happen and only logged.
//! Query-side errors are returned to the transport layer as [`QueryError`],
//! which always carries a stable [`ErrorCode`].

use std::fmt;

use crate::decimal::DecimalParseError;
use crate::store::StoreError;

/// Transient feed connectivity failure. Triggers a reconnect with backoff.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to connect to feed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("feed connection failed: {0}")]
    Io(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("feed closed the connection")]
    RemoteClosed,
}

/// Malformed or incomplete feed frame. The frame is dropped.
#[derive(Debug, thiserror::Error)]
pub enum MessageParseError {
    #[error("invalid ticker json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ticker frame has no symbol")]
    MissingSymbol,

    #[error("ticker frame has no last price")]
    MissingPrice,

    #[error("invalid last price: {0}")]
    InvalidPrice(#[from] DecimalParseError),

    #[error("unexpected non-text frame")]
    NonText,
}

/// The store rejected a write on every attempt.
#[derive(Debug, thiserror::Error)]
#[error("failed to persist {symbol} tick after {attempts} attempts: {source}")]
pub struct PersistenceWriteError {
    pub symbol: String,
    pub attempts: u32,
    #[source]
    pub source: StoreError,
}

/// Stable, machine-readable code attached to every query failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    PriceDataNotFound,
    InsufficientDataPoints,
    InvalidTimePeriod,
    InvalidSampleCount,
    InvalidSymbol,
    RepositoryError,
    StoreUnavailable,
    ValueOutOfRange,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PriceDataNotFound => "PRICE_DATA_NOT_FOUND",
            ErrorCode::InsufficientDataPoints => "INSUFFICIENT_DATA_POINTS",
            ErrorCode::InvalidTimePeriod => "INVALID_TIME_PERIOD",
            ErrorCode::InvalidSampleCount => "INVALID_SAMPLE_COUNT",
            ErrorCode::InvalidSymbol => "INVALID_SYMBOL",
            ErrorCode::RepositoryError => "REPOSITORY_ERROR",
            ErrorCode::StoreUnavailable => "STORE_UNAVAILABLE",
            ErrorCode::ValueOutOfRange => "VALUE_OUT_OF_RANGE",
        }
    }

    /// Whether the caller can fix the request (validation-class codes).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::PriceDataNotFound
                | ErrorCode::InsufficientDataPoints
                | ErrorCode::InvalidTimePeriod
                | ErrorCode::InvalidSampleCount
                | ErrorCode::InvalidSymbol
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("No price data available for {symbol} in the last 24 hours.")]
    DataNotFound { symbol: String },

    #[error("Not enough data points: {required} required, {found} found.")]
    InsufficientData { required: u32, found: usize },

    #[error("Invalid time period \"{0}\", expected one of 1m, 5m, 30m, 1d, 1w.")]
    InvalidPeriod(String),

    #[error("Sample count must be greater than zero.")]
    InvalidSampleCount,

    #[error("Symbol must not be empty.")]
    InvalidSymbol,

    #[error("An error occurred while reading price data.")]
    Repository(#[source] StoreError),

    #[error("Price store did not answer within {timeout_ms}ms.")]
    StoreUnavailable { timeout_ms: u64 },

    #[error("Average of {count} {symbol} prices is out of decimal range.")]
    ValueOutOfRange { symbol: String, count: usize },
}

impl QueryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            QueryError::DataNotFound { .. } => ErrorCode::PriceDataNotFound,
            QueryError::InsufficientData { .. } => ErrorCode::InsufficientDataPoints,
            QueryError::InvalidPeriod(_) => ErrorCode::InvalidTimePeriod,
            QueryError::InvalidSampleCount => ErrorCode::InvalidSampleCount,
            QueryError::InvalidSymbol => ErrorCode::InvalidSymbol,
            QueryError::Repository(_) => ErrorCode::RepositoryError,
            QueryError::StoreUnavailable { .. } => ErrorCode::StoreUnavailable,
            QueryError::ValueOutOfRange { .. } => ErrorCode::ValueOutOfRange,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.code().is_client_error()
    }
}

impl From<StoreError> for QueryError {
    fn from(error: StoreError) -> Self {
        QueryError::Repository(error)
    }
}
