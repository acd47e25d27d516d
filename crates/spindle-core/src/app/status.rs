//! Status - 外部に見せる task のビュー
//!
//! store の `Task` は lease などの内部情報を持つので、そのままは返さない。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Task, TaskId, TaskState, TaskType};
use crate::ports::TaskFilter;

pub const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub state: TaskState,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id(),
            task_type: task.task_type().clone(),
            state: task.state(),
            attempt_count: task.attempt_count(),
            created_at: task.created_at(),
            updated_at: task.updated_at(),
            completed_at: task.completed_at(),
            last_error: task.last_error().map(str::to_owned),
        }
    }
}

/// Result lookup: the value, the terminal error, or "not done yet".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { result: serde_json::Value },
    Failed { error: String, attempt_count: u32 },
    Pending { state: TaskState },
}

impl From<&Task> for TaskOutcome {
    fn from(task: &Task) -> Self {
        match task.state() {
            TaskState::Completed => TaskOutcome::Completed {
                result: task.result().cloned().unwrap_or(serde_json::Value::Null),
            },
            TaskState::Failed => TaskOutcome::Failed {
                error: task.error().unwrap_or_default().to_owned(),
                attempt_count: task.attempt_count(),
            },
            state => TaskOutcome::Pending { state },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListFilter {
    pub state: Option<TaskState>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub limit: Option<usize>,
}

impl ListFilter {
    /// Newest first, capped at `DEFAULT_LIST_LIMIT` unless a limit is given.
    pub(crate) fn to_store_filter(&self) -> TaskFilter {
        TaskFilter {
            state: self.state,
            task_type: self.task_type.clone(),
            limit: Some(self.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
            ..TaskFilter::all()
        }
        .newest_first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CoordinatorId, Lease, LeaseId, Transition};
    use serde_json::json;
    use ulid::Ulid;

    fn claimed() -> (Task, LeaseId) {
        let now = Utc::now();
        let mut task = Task::new(TaskId::from_ulid(Ulid::new()), TaskType::new("email"), json!({}), now);
        let lease = Lease {
            id: LeaseId::from_ulid(Ulid::new()),
            holder: CoordinatorId::from_ulid(Ulid::new()),
            acquired_at: now,
            expires_at: None,
        };
        let id = lease.id;
        task.apply(Transition::Claim { lease, count_attempt: true }, now).unwrap();
        (task, id)
    }

    #[test]
    fn outcome_follows_state() {
        let (task, _) = claimed();
        assert_eq!(
            TaskOutcome::from(&task),
            TaskOutcome::Pending {
                state: TaskState::Running
            }
        );

        let (mut done, lease) = claimed();
        done.apply(Transition::Complete { lease, result: json!("ok") }, Utc::now())
            .unwrap();
        assert_eq!(TaskOutcome::from(&done), TaskOutcome::Completed { result: json!("ok") });

        let (mut failed, lease) = claimed();
        failed
            .apply(Transition::Fail { lease, error: "nope".into() }, Utc::now())
            .unwrap();
        assert_eq!(
            TaskOutcome::from(&failed),
            TaskOutcome::Failed {
                error: "nope".into(),
                attempt_count: 1
            }
        );
    }

    #[test]
    fn view_uses_wire_names() {
        let (task, _) = claimed();
        let v = serde_json::to_value(TaskView::from(&task)).unwrap();
        assert_eq!(v["type"], "email");
        assert_eq!(v["state"], "RUNNING");
        assert_eq!(v["attempt_count"], 1);
    }

    #[test]
    fn list_filter_defaults_to_newest_hundred() {
        let filter = ListFilter::default().to_store_filter();
        assert_eq!(filter.limit, Some(DEFAULT_LIST_LIMIT));
        assert!(filter.newest_first);
        assert!(filter.ready_at.is_none());
    }
}
