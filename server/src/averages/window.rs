use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::QueryError;

/// Sampling period of an SMA query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    OneMinute,
    FiveMinutes,
    ThirtyMinutes,
    OneDay,
    OneWeek,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneMinute => "1m",
            Period::FiveMinutes => "5m",
            Period::ThirtyMinutes => "30m",
            Period::OneDay => "1d",
            Period::OneWeek => "1w",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Period::OneMinute => 60,
            Period::FiveMinutes => 5 * 60,
            Period::ThirtyMinutes => 30 * 60,
            Period::OneDay => 24 * 60 * 60,
            Period::OneWeek => 7 * 24 * 60 * 60,
        }
    }
}

impl FromStr for Period {
    type Err = QueryError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "1m" => Ok(Period::OneMinute),
            "5m" => Ok(Period::FiveMinutes),
            "30m" => Ok(Period::ThirtyMinutes),
            "1d" => Ok(Period::OneDay),
            "1w" => Ok(Period::OneWeek),
            other => Err(QueryError::InvalidPeriod(other.to_string())),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const TRAILING_WINDOW_HOURS: i64 = 24;

/// A windowed-aggregate request. Pure value, lives only for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowQuery {
    Trailing {
        symbol: String,
        duration: TimeDelta,
    },
    Sampled {
        symbol: String,
        sample_count: u32,
        period: Period,
        anchor: DateTime<Utc>,
    },
}

impl WindowQuery {
    pub fn trailing_24h(symbol: &str) -> Self {
        WindowQuery::Trailing {
            symbol: symbol.to_string(),
            duration: TimeDelta::hours(TRAILING_WINDOW_HOURS),
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            WindowQuery::Trailing { symbol, .. } | WindowQuery::Sampled { symbol, .. } => symbol,
        }
    }

    /// Inclusive `[from, to]` bounds. Sampled windows span
    /// `period * sample_count` back from the anchor, clamped at the
    /// earliest representable time.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            WindowQuery::Trailing { duration, .. } => {
                let from = now
                    .checked_sub_signed(*duration)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                (from, now)
            }
            WindowQuery::Sampled {
                sample_count,
                period,
                anchor,
                ..
            } => {
                let from = period
                    .seconds()
                    .checked_mul(i64::from(*sample_count))
                    .and_then(TimeDelta::try_seconds)
                    .and_then(|span| anchor.checked_sub_signed(span))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                (from, *anchor)
            }
        }
    }
}
