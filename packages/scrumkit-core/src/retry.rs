/// Exponential backoff bookkeeping.
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// `min(initial * 2^retry_count, max)`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn allows(&self, retry_count: u32) -> bool {
        retry_count < self.max_attempts
    }
}

/// Retry counter for one resilience loop.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    retry_count: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retry_count: 0,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_exhausted(&self) -> bool {
        !self.policy.allows(self.retry_count)
    }

    /// Delay before the next retry, consuming one attempt, or `None` once the
    /// budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.policy.delay_for(self.retry_count);
        self.retry_count += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.retry_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, max_delay_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    #[test]
    fn test_delays_double_until_budget_spent() {
        let mut state = RetryState::new(policy(3, 10_000));
        assert_eq!(state.next_delay(), Some(Duration::from_millis(1_000)));
        assert_eq!(state.next_delay(), Some(Duration::from_millis(2_000)));
        assert_eq!(state.next_delay(), Some(Duration::from_millis(4_000)));
        assert_eq!(state.next_delay(), None);
        assert!(state.is_exhausted());

        state.reset();
        assert_eq!(state.retry_count(), 0);
        assert_eq!(state.next_delay(), Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn test_delay_capped() {
        let p = policy(10, 10_000);
        assert_eq!(p.delay_for(3), Duration::from_millis(8_000));
        assert_eq!(p.delay_for(4), Duration::from_millis(10_000));
        assert_eq!(p.delay_for(9), Duration::from_millis(10_000));

        let channel = policy(10, 60_000);
        assert_eq!(channel.delay_for(5), Duration::from_millis(32_000));
        assert_eq!(channel.delay_for(6), Duration::from_millis(60_000));
    }

    #[test]
    fn test_huge_retry_count_does_not_overflow() {
        let p = policy(u32::MAX, 60_000);
        assert_eq!(p.delay_for(40), Duration::from_millis(60_000));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_millis(60_000));
    }
}
