//! Retry policy for completion calls, kept free of any I/O.

use std::time::Duration;

use crate::errors::LlmErrorKind;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Decides what to do after attempt number `attempt` (1-based) failed with `kind`.
    pub fn decide(
        &self,
        attempt: u32,
        kind: LlmErrorKind,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if !kind.is_transient() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        let backoff = self.backoff(attempt);
        let delay = retry_after.map_or(backoff, |hint| hint.max(backoff));
        RetryDecision::RetryAfter(delay.min(self.max_delay))
    }

    /// Exponential backoff: base, 2·base, 4·base, ... capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::new(10);
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(6), Duration::from_secs(30));
        assert_eq!(policy.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn test_transient_errors_retry_until_ceiling() {
        let policy = RetryPolicy::new(3);
        for kind in [
            LlmErrorKind::Timeout,
            LlmErrorKind::RateLimited,
            LlmErrorKind::TransportFailure,
        ] {
            assert_eq!(
                policy.decide(1, kind, None),
                RetryDecision::RetryAfter(Duration::from_secs(1))
            );
            assert_eq!(
                policy.decide(2, kind, None),
                RetryDecision::RetryAfter(Duration::from_secs(2))
            );
            assert_eq!(policy.decide(3, kind, None), RetryDecision::GiveUp);
        }
    }

    #[test]
    fn test_invalid_response_never_retries() {
        let policy = RetryPolicy::new(5);
        assert_eq!(
            policy.decide(1, LlmErrorKind::InvalidResponse, None),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_retry_after_hint_wins_when_longer() {
        let policy = RetryPolicy::new(3);
        assert_eq!(
            policy.decide(1, LlmErrorKind::RateLimited, Some(Duration::from_secs(7))),
            RetryDecision::RetryAfter(Duration::from_secs(7))
        );
        assert_eq!(
            policy.decide(2, LlmErrorKind::RateLimited, Some(Duration::from_millis(10))),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            policy.decide(1, LlmErrorKind::RateLimited, Some(Duration::from_secs(600))),
            RetryDecision::RetryAfter(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_single_attempt_policy_gives_up_immediately() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(
            policy.decide(1, LlmErrorKind::Timeout, None),
            RetryDecision::GiveUp
        );
    }
}
