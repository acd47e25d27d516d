//! Decision model: what to do with a task after a failed attempt.

use std::time::Duration;

use super::outcome::Failure;

/// The next action to take for a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Put the task back to PENDING, claimable again after `delay`.
    RetryAfter(Duration),

    /// Mark the task FAILED (terminal).
    GiveUp,
}

/// Trait for deciding the next action after a failure.
///
/// Deciders are pure functions: identical inputs give identical decisions.
/// The dispatcher applies the decision; the decider never touches the store.
pub trait Decider: Send + Sync {
    /// # Arguments
    /// * `retries_used` - Retries already consumed (`attempt_count - 1` for
    ///   the attempt that just failed).
    /// * `failure` - What went wrong, including its kind tag.
    fn decide(&self, retries_used: u32, failure: &Failure) -> Decision;
}
