//! Task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task state.
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Pending (retry scheduled, loop until budget is spent)
/// - Pending -> Running -> Failed (retry budget exhausted, or unknown task type)
///
/// Serialized as SCREAMING_SNAKE_CASE: PENDING / RUNNING / COMPLETED / FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting to be claimed (possibly not before `eligible_at`).
    Pending,

    /// Claimed by a dispatcher; an executor may be running.
    Running,

    /// Finished successfully, `result` is set.
    Completed,

    /// Finished unsuccessfully, `error` is set.
    Failed,
}

impl TaskState {
    pub const ALL: [TaskState; 4] = [
        TaskState::Pending,
        TaskState::Running,
        TaskState::Completed,
        TaskState::Failed,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::pending(TaskState::Pending, false)]
    #[case::running(TaskState::Running, false)]
    #[case::completed(TaskState::Completed, true)]
    #[case::failed(TaskState::Failed, true)]
    fn terminal_states(#[case] state: TaskState, #[case] terminal: bool) {
        assert_eq!(state.is_terminal(), terminal);
    }

    #[test]
    fn state_serializes_as_required_names() {
        for state in TaskState::ALL {
            let s = serde_json::to_string(&state).unwrap();
            assert_eq!(s, format!("\"{}\"", state.as_str()));
        }
    }
}
