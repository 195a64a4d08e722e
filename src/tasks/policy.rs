//! Retry backoff

use std::time::Duration;

/// Exponential backoff seeded from the task timeout
///
/// The n-th retry waits `timeout * 2^(n-1)`, never more than `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_backoff: Duration) -> Self {
        Self { max_backoff }
    }

    /// Delay before the run following failed run number `attempts`.
    pub fn backoff(&self, timeout: Duration, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        timeout
            .checked_mul(1u32 << exponent)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(Duration::from_secs(10));
        let timeout = Duration::from_secs(2);

        assert_eq!(policy.backoff(timeout, 1), Duration::from_secs(2));
        assert_eq!(policy.backoff(timeout, 2), Duration::from_secs(4));
        assert_eq!(policy.backoff(timeout, 3), Duration::from_secs(8));
        assert_eq!(policy.backoff(timeout, 4), Duration::from_secs(10));
        assert_eq!(policy.backoff(timeout, 40), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_timeout_retries_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(Duration::ZERO, 3), Duration::ZERO);
    }
}
