//! Retry policy applied to unexpected player stops.

use std::time::Duration;

/// Default number of automatic retries before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default fixed part of the retry delay (seconds).
pub const DEFAULT_BASE_DELAY_SECS: u64 = 2;

/// Default per-attempt increment of the retry delay (seconds).
pub const DEFAULT_INCREMENT_SECS: u64 = 2;

/// Default uptime after which a crash starts a new retry series (seconds).
pub const DEFAULT_STABLE_AFTER_SECS: u64 = 60;

/// Linear backoff: the n-th retry waits `base_delay + n * increment`.
///
/// With the defaults the three retries wait 4s, 6s and 8s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub increment: Duration,
    /// A stream that stayed up this long resets the attempt counter when it
    /// stops.
    pub stable_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(DEFAULT_BASE_DELAY_SECS),
            increment: Duration::from_secs(DEFAULT_INCREMENT_SECS),
            stable_after: Duration::from_secs(DEFAULT_STABLE_AFTER_SECS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_add(self.increment.saturating_mul(attempt))
    }

    /// True once `attempt` is past the allowed number of retries.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_retries
    }
}
