//! TaskStore port - the durable source of truth for task records.
//!
//! TaskStore が状態の正本。dispatcher 同士の協調はすべてここでの
//! 条件付き更新（compare-and-set）で表現し、プロセス内の共有ロックには頼らない。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{TaskId, TaskState, TaskType, Task, Transition, TransitionError};

/// Selection criteria for `TaskStore::list`.
///
/// Results are ordered by `created_at` (ties by id), oldest first unless
/// `newest_first` is set; `limit` applies after ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub state: Option<TaskState>,
    pub task_type: Option<TaskType>,

    /// Only PENDING tasks claimable at this instant.
    pub ready_at: Option<DateTime<Utc>>,

    pub limit: Option<usize>,
    pub newest_first: bool,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// PENDING tasks whose retry delay has elapsed at `now`, FIFO.
    pub fn ready(now: DateTime<Utc>) -> Self {
        Self {
            state: Some(TaskState::Pending),
            ready_at: Some(now),
            ..Self::default()
        }
    }

    pub fn in_state(state: TaskState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.state.is_none_or(|s| task.state() == s)
            && self.task_type.as_ref().is_none_or(|t| task.task_type() == t)
            && self.ready_at.is_none_or(|now| task.is_ready(now))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The transition's precondition did not hold (lost claim race, stale lease).
    #[error("conflict on {id} ({transition}): {reason}")]
    Conflict {
        id: TaskId,
        transition: &'static str,
        reason: TransitionError,
    },

    /// The store could not durably record the operation; nothing was changed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// TaskStore は task の状態・payload・結果の正本
///
/// # 設計原則
/// - `update` は同じ id に対する他の `update` と原子的（CAS）
/// - 成功したすべての変更で `updated_at` が進む
/// - 削除は `delete` の明示的な要求でのみ起きる
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a PENDING task; the store assigns the id.
    async fn create(&self, task_type: TaskType, payload: serde_json::Value) -> Result<Task, StoreError>;

    /// Fetch a task. Tasks deleted while running are reported as NotFound.
    async fn get(&self, id: TaskId) -> Result<Task, StoreError>;

    /// Apply `transition` atomically if its precondition holds.
    async fn update(&self, id: TaskId, transition: Transition) -> Result<Task, StoreError>;

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    /// Remove a task. A RUNNING task is hidden immediately and removed once
    /// its outcome is reported.
    async fn delete(&self, id: TaskId) -> Result<(), StoreError>;
}
