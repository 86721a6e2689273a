//! Waits between feed reconnects and between tick write attempts.

use std::time::Duration;

pub const RECONNECT_BASE: Duration = Duration::from_millis(500);
pub const RECONNECT_MAX: Duration = Duration::from_secs(30);

pub const WRITE_RETRY_BASE: Duration = Duration::from_millis(100);
pub const WRITE_RETRY_MAX: Duration = Duration::from_secs(2);
pub const DEFAULT_WRITE_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Step doubles from `base` on every attempt and stops growing at `max`.
    /// The wait is drawn uniformly from the upper half of the step.
    Capped { base: Duration, max: Duration },
    /// Same wait on every attempt.
    Fixed(Duration),
}

impl Default for Backoff {
    fn default() -> Self {
        Self::capped(RECONNECT_BASE, RECONNECT_MAX)
    }
}

impl Backoff {
    /// A cap below `base` is raised to `base`.
    pub fn capped(base: Duration, max: Duration) -> Self {
        Self::Capped {
            base,
            max: max.max(base),
        }
    }

    /// Longest wait `delay(attempt)` can return.
    pub fn step(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => delay,
            Self::Capped { base, max } => 1u32
                .checked_shl(attempt)
                .and_then(|factor| base.checked_mul(factor))
                .map_or(max, |step| step.min(max)),
        }
    }

    /// Wait before attempt number `attempt` (0-based) after a failure.
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => delay,
            Self::Capped { .. } => {
                let step = self.step(attempt);
                let floor = step / 2;
                let spread_ms = (step - floor).as_millis() as u64;
                floor + Duration::from_millis(fastrand::u64(0..=spread_ms))
            }
        }
    }
}

/// Write retry budget. A tick gets at most `max_retries + 1` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_WRITE_RETRIES,
            Backoff::capped(WRITE_RETRY_BASE, WRITE_RETRY_MAX),
        )
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Wait before retry number `retry` (0-based), or `None` once the
    /// budget is spent.
    pub fn next_delay(&self, retry: u32) -> Option<Duration> {
        (retry < self.max_retries).then(|| self.backoff.delay(retry))
    }
}
