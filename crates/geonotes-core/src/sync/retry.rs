//! Retry bounds for queued changes and background backoff.

use std::time::Duration;

/// Configuration for replay retries and background backoff.
///
/// A queued change that fails transiently `max_attempts` times is moved out
/// of the queue and flagged for review. Background runs that fail or leave
/// work behind wait `initial_delay * factor^n`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(900),
            factor: 2,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Whether a change that failed `attempts` times goes to review
    pub const fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Delay after `current`, never below `initial_delay`
    pub fn next_delay(&self, current: Option<Duration>) -> Duration {
        current
            .map_or(self.initial_delay, |delay| delay.saturating_mul(self.factor))
            .clamp(self.initial_delay, self.max_delay.max(self.initial_delay))
    }

    /// Fast policy for tests (minimal delays)
    #[cfg(test)]
    pub const fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2,
        }
    }
}
