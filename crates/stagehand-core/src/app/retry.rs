//! Conflict retry policy: bounds and paces read-compute-write retries.

use std::time::Duration;

use crate::config::ConflictRetryConfig;

/// Retry policy for version conflicts.
///
/// Conflicts are transient by definition: another writer committed first, so
/// the caller re-reads and tries again. The policy only decides how many times
/// and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRetry {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay after the first conflict.
    pub initial_backoff: Duration,

    /// Upper bound of the doubling delay.
    pub max_backoff: Duration,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self::from(&ConflictRetryConfig::default())
    }
}

impl From<&ConflictRetryConfig> for ConflictRetry {
    fn from(config: &ConflictRetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl ConflictRetry {
    /// Delay before the next attempt after `attempt` (1-indexed) conflicted.
    ///
    /// With initial=1ms, max=50ms: 1ms, 2ms, 4ms, ..., 32ms, 50ms, 50ms, ...
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Have we used up every attempt?
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_matches_config_defaults() {
        let policy = ConflictRetry::default();
        assert_eq!(policy.max_attempts, 16);
        assert_eq!(policy.initial_backoff, Duration::from_millis(1));
        assert_eq!(policy.max_backoff, Duration::from_millis(50));
    }

    #[rstest]
    #[case::first(1, 1)]
    #[case::second(2, 2)]
    #[case::sixth(6, 32)]
    #[case::capped(7, 50)]
    #[case::far_out(40, 50)]
    fn backoff_doubles_until_capped(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = ConflictRetry::default();
        assert_eq!(policy.next_delay(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let policy = ConflictRetry {
            max_attempts: 3,
            ..ConflictRetry::default()
        };
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
