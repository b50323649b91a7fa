//! Exponential backoff policy for retryable stage failures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    2
}

fn default_max_delay_secs() -> u64 {
    60
}

/// Backoff schedule applied to transient and resource failures.
///
/// With the defaults a stage is attempted up to four times total
/// (the initial attempt plus three retries) with delays of 2s, 4s, 8s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries allowed per stage after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay; subsequent delays double.
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    /// Upper bound on any single delay, including server hints.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl RetryPolicy {
    /// Whether another retry is allowed after `retry_count` failed retries
    /// of the current stage.
    #[must_use]
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before retry number `attempt` (1-based): `base · 2^(attempt−1)`,
    /// capped at [`max_delay_secs`](Self::max_delay_secs).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let secs = self
            .base_delay_secs
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_secs);
        Duration::from_secs(secs)
    }

    /// Like [`delay_for`](Self::delay_for), but a server-provided
    /// `Retry-After` hint takes precedence over the computed backoff.
    /// The hint is still capped at the maximum delay.
    #[must_use]
    pub fn delay_with_hint(&self, attempt: u32, hint_ms: Option<u64>) -> Duration {
        match hint_ms {
            Some(ms) => Duration::from_millis(ms.min(self.max_delay_secs.saturating_mul(1000))),
            None => self.delay_for(attempt),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_2_4_8() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn should_retry_stops_at_max() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(10));
    }

    #[test]
    fn hint_overrides_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_with_hint(1, Some(500)),
            Duration::from_millis(500)
        );
        assert_eq!(policy.delay_with_hint(1, None), Duration::from_secs(2));
    }

    #[test]
    fn hint_is_capped_at_max_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_with_hint(1, Some(120_000)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn zero_attempt_behaves_like_first() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
    }

    #[test]
    fn deserializes_with_partial_fields() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"maxRetries":5}"#).unwrap();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_delay_secs, 2);
        assert_eq!(policy.max_delay_secs, 60);
    }
}
