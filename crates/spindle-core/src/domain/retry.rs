//! Retry policy: retry budget and backoff delays.

use std::time::Duration;

use super::decision::{Decider, Decision};
use super::outcome::Failure;

/// Retry policy for failed tasks.
///
/// Default: 3 retries with a fixed 5s delay. Setting `multiplier` above 1.0
/// turns the fixed delay into exponential backoff, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier applied per retry already used.
    pub multiplier: f64,

    /// Upper bound for any computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            multiplier: 1.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay.max(Duration::from_secs(300)),
        }
    }

    /// Calculate the delay before the next retry.
    ///
    /// delay = base_delay * multiplier^retries_used, capped at `max_delay`.
    ///
    /// Example with base_delay=2s, multiplier=2.0:
    /// - retries_used 0: 2s
    /// - retries_used 1: 4s
    /// - retries_used 2: 8s
    pub fn next_delay(&self, retries_used: u32) -> Duration {
        let exponent = i32::try_from(retries_used).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Decider for RetryPolicy {
    fn decide(&self, retries_used: u32, _failure: &Failure) -> Decision {
        if retries_used < self.max_retries {
            Decision::RetryAfter(self.next_delay(retries_used))
        } else {
            Decision::GiveUp
        }
    }
}
