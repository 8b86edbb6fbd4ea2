//! Retry policy for generation stages.
//!
//! An item moves through `Attempting(n) -> Backoff -> Attempting(n + 1)` until
//! it succeeds, runs out of attempts (`Exhausted`, eligible for a later pass)
//! or hits an error that no retry can fix (`Abandoned`).

use std::time::Duration;

use reel_models::RetryPolicyConfig;

/// Backoff and pass layout for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per item in the first and second pass
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub second_pass_cooldown: Duration,
    pub final_pass_cooldown: Duration,
    /// Attempts per item in the final pass
    pub final_pass_attempts: u32,
}

/// One sweep over the items that are still failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    pub number: u32,
    /// Pause before the pass starts
    pub cooldown: Duration,
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryPolicyConfig::default())
    }
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(config: &RetryPolicyConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            second_pass_cooldown: Duration::from_millis(config.second_pass_cooldown_ms),
            final_pass_cooldown: Duration::from_millis(config.final_pass_cooldown_ms),
            final_pass_attempts: config.final_pass_attempts.max(1),
        }
    }
}

impl RetryPolicy {
    /// Policy without any waiting, for tests and local fakes.
    pub fn immediate(attempts: u32, final_pass_attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            second_pass_cooldown: Duration::ZERO,
            final_pass_cooldown: Duration::ZERO,
            final_pass_attempts: final_pass_attempts.max(1),
        }
    }

    /// Backoff after the failed attempt number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// The three passes in execution order.
    pub fn passes(&self) -> [Pass; 3] {
        [
            Pass {
                number: 1,
                cooldown: Duration::ZERO,
                attempts: self.attempts,
            },
            Pass {
                number: 2,
                cooldown: self.second_pass_cooldown,
                attempts: self.attempts,
            },
            Pass {
                number: 3,
                cooldown: self.final_pass_cooldown,
                attempts: self.final_pass_attempts,
            },
        ]
    }
}

/// Where an item ended up after one pass.
#[derive(Debug)]
pub enum ItemOutcome<A> {
    Done(A),
    /// Every attempt failed with a retryable error
    Exhausted(String),
    /// A non-retryable error; the item gets no further attempts
    Abandoned(String),
}

impl<A> ItemOutcome<A> {
    pub fn is_done(&self) -> bool {
        matches!(self, ItemOutcome::Done(_))
    }
}

/// In-flight states of one item within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptState {
    Attempting(u32),
    Backoff { delay: Duration, next: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(20),
            ..RetryPolicy::immediate(3, 2)
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(20));
    }

    #[test]
    fn test_passes_from_config() {
        let policy = RetryPolicy::from(&RetryPolicyConfig::default());
        let passes = policy.passes();

        assert_eq!(passes[0].cooldown, Duration::ZERO);
        assert_eq!(passes[1].cooldown, Duration::from_secs(10));
        assert_eq!(passes[2].cooldown, Duration::from_secs(30));
        assert_eq!(passes[0].attempts, passes[1].attempts);
        assert!(passes[2].attempts < passes[1].attempts);
    }

    #[test]
    fn test_zero_attempts_are_raised_to_one() {
        let config = RetryPolicyConfig {
            attempts: 0,
            final_pass_attempts: 0,
            ..RetryPolicyConfig::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.final_pass_attempts, 1);
    }
}
