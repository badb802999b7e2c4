//! Retry policy for failed deliveries.
//!
//! Exponential backoff with jitter and a bounded attempt count. A policy with
//! `max_attempts == 0` never gives up on a retryable error.

use std::time::Duration;

use rand::Rng;

use crate::error::DeliveryError;

/// How failed deliveries are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Failed attempts allowed before an item is dead-lettered. 0 = unlimited.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied to each delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.25,
        }
    }
}

/// What to do with an item after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the item back on the queue once `after` has elapsed.
    Retry { after: Duration },
    /// Stop retrying and dead-letter the item.
    GiveUp { reason: String },
}

impl RetryPolicy {
    pub fn is_unbounded(&self) -> bool {
        self.max_attempts == 0
    }

    /// Decide whether to retry after `attempts` failures, the last being `error`.
    pub fn decide(&self, attempts: u32, error: &DeliveryError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {error}"),
            };
        }

        if !self.is_unbounded() && attempts >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.max_attempts),
            };
        }

        RetryDecision::Retry {
            after: self.delay_for(attempts),
        }
    }

    /// Backoff delay after the given number of failed attempts (1-based).
    ///
    /// Doubles from `base_delay`, capped at `max_delay`, then jittered.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let delay = self.base_delay.saturating_mul(multiplier).min(self.max_delay);

        apply_jitter(delay, self.jitter_factor).min(self.max_delay)
    }
}

/// Randomize a delay by ±`jitter_factor`.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if !jitter_factor.is_finite() || jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let jitter_range = duration.as_secs_f64() * jitter_factor.clamp(0.0, 1.0);
    let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_without_jitter() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = policy_without_jitter();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for(40), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter_factor: 0.25,
            max_delay: Duration::from_secs(60),
            ..policy_without_jitter()
        };

        for _ in 0..100 {
            let delay = policy.delay_for(3);
            assert!(delay >= Duration::from_millis(299), "{delay:?}");
            assert!(delay <= Duration::from_millis(501), "{delay:?}");
        }
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = policy_without_jitter();
        let error = DeliveryError::transport("connection refused");

        assert!(matches!(policy.decide(4, &error), RetryDecision::Retry { .. }));
        match policy.decide(5, &error) {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("maximum attempts (5)")),
            other => panic!("expected GiveUp, got {other:?}"),
        }
    }

    #[test]
    fn test_unbounded_policy_never_gives_up_on_transport_errors() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..policy_without_jitter()
        };
        let error = DeliveryError::transport("connection refused");

        assert!(policy.is_unbounded());
        assert_eq!(
            policy.decide(10_000, &error),
            RetryDecision::Retry {
                after: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn test_non_retryable_error_gives_up_immediately() {
        let policy = policy_without_jitter();
        let error = DeliveryError::Encode {
            message: "bad body".to_string(),
        };

        assert!(matches!(policy.decide(1, &error), RetryDecision::GiveUp { .. }));
    }

    #[test]
    fn test_non_finite_jitter_is_ignored() {
        for jitter_factor in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let policy = RetryPolicy {
                jitter_factor,
                ..policy_without_jitter()
            };
            assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        }
    }

    #[test]
    fn test_zero_base_delay_retries_immediately() {
        let policy = RetryPolicy {
            base_delay: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(3), Duration::ZERO);
    }
}
