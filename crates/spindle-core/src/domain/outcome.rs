//! Outcome model: how an execution attempt can go wrong.
//!
//! Executors return `ExecutionError`; the worker pool turns everything that
//! ends an attempt unsuccessfully (executor error, timeout, panic) into a
//! `Failure`, which is what the retry policy looks at.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Classification of a failed attempt.
///
/// The default retry policy treats every kind the same; the tag exists so
/// custom deciders can differentiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The executor returned an error.
    Executor,

    /// The executor did not finish within the configured timeout.
    Timeout,

    /// The executor panicked.
    Panicked,

    /// The payload could not be decoded into the executor's input type.
    InvalidPayload,

    /// The task was found RUNNING with no live owner (crash or expired lease).
    Orphaned,
}

/// A failed attempt, as seen by the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("execution timed out after {}ms", limit.as_millis()),
        )
    }

    pub fn panicked() -> Self {
        Self::new(FailureKind::Panicked, "executor panicked")
    }

    pub fn orphaned() -> Self {
        Self::new(FailureKind::Orphaned, "orphaned: no live owner")
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Error returned by an executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("failed to encode result: {0}")]
    Encode(String),
}

impl ExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ExecutionError::InvalidPayload(_) => FailureKind::InvalidPayload,
            ExecutionError::Failed(_) | ExecutionError::Encode(_) => FailureKind::Executor,
        }
    }
}

impl From<ExecutionError> for Failure {
    fn from(err: ExecutionError) -> Self {
        Failure::new(err.kind(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_maps_to_failure_kind() {
        let f: Failure = ExecutionError::failed("boom").into();
        assert_eq!(f.kind, FailureKind::Executor);
        assert_eq!(f.message, "boom");

        let f: Failure = ExecutionError::InvalidPayload("missing field".into()).into();
        assert_eq!(f.kind, FailureKind::InvalidPayload);
        assert_eq!(f.message, "invalid payload: missing field");
    }

    #[test]
    fn timeout_failure_mentions_limit() {
        let f = Failure::timeout(Duration::from_millis(250));
        assert_eq!(f.kind, FailureKind::Timeout);
        assert!(f.message.contains("250ms"));
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let s = serde_json::to_string(&FailureKind::InvalidPayload).unwrap();
        assert_eq!(s, "\"invalid_payload\"");
    }
}
