//! Retry policy: exponential backoff with a bounded attempt count.

use std::time::Duration;

use anyhow::{Result, bail};

/// Configuration for retrying a failed task.
///
/// `delay = base * multiplier^(attempt - 1)`, where `attempt` is 1-based
/// (the first retry uses `base` directly).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Build a policy, rejecting a multiplier that would shrink or freeze
    /// the backoff (`< 1.0`) and a zero base delay with more than one retry
    /// configured (there would be nothing to back off).
    pub fn new(max_retries: u32, base: Duration, multiplier: f64) -> Result<Self> {
        if multiplier < 1.0 {
            bail!("retry multiplier must be >= 1.0, got {multiplier}");
        }
        if !multiplier.is_finite() {
            bail!("retry multiplier must be finite, got {multiplier}");
        }
        Ok(Self {
            max_retries,
            base,
            multiplier,
        })
    }

    pub fn can_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Backoff delay before the given 1-based retry attempt.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi((attempt - 1) as i32);
        Duration::from_secs_f64(self.base.as_secs_f64() * factor)
    }
}

impl Default for RetryPolicy {
    /// Three retries, one second base delay, doubling each attempt.
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_sub_unity_multiplier() {
        assert!(RetryPolicy::new(3, Duration::from_secs(1), 0.5).is_err());
    }

    #[test]
    fn rejects_non_finite_multiplier() {
        assert!(RetryPolicy::new(3, Duration::from_secs(1), f64::INFINITY).is_err());
        assert!(RetryPolicy::new(3, Duration::from_secs(1), f64::NAN).is_err());
    }

    #[test]
    fn accepts_unity_multiplier_as_fixed_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), 1.0).unwrap();
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for_attempt(5), Duration::from_secs(2));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), 2.0).unwrap();
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn can_retry_respects_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.can_retry(0));
        assert!(policy.can_retry(2));
        assert!(!policy.can_retry(3));
    }
}
