//! Record table shared by the store implementations.
//!
//! Every mutation is split in two steps:
//! 1. `stage_*` validates the operation against the current records and
//!    returns a `Change` without touching them.
//! 2. `commit` applies the change.
//!
//! The in-memory store commits right away; the file store writes the staged
//! snapshot durably first and only commits if that write succeeded.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::{Task, TaskId, TaskState, Transition, TransitionError};
use crate::ports::{StoreError, TaskFilter};

/// A validated, not-yet-applied mutation.
#[derive(Debug, Clone)]
pub(crate) enum Change {
    Put(Task),
    Remove(TaskId),
}

impl Change {
    /// What `update` returns once the change is committed.
    ///
    /// A transition that ends in removal hit a task deleted while running,
    /// which callers observe as gone.
    pub(crate) fn into_task(self) -> Result<Task, StoreError> {
        match self {
            Change::Put(task) => Ok(task),
            Change::Remove(id) => Err(StoreError::NotFound(id)),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TaskTable {
    records: HashMap<TaskId, Task>,
}

impl TaskTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records.
    ///
    /// Records deleted while running are dropped: whoever ran them is gone.
    pub(crate) fn from_records(records: Vec<Task>) -> Self {
        Self {
            records: records
                .into_iter()
                .filter(|t| !t.is_delete_requested())
                .map(|t| (t.id(), t))
                .collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        match self.records.get(&id) {
            Some(task) if !task.is_delete_requested() => Ok(task.clone()),
            _ => Err(StoreError::NotFound(id)),
        }
    }

    pub(crate) fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .records
            .values()
            .filter(|t| !t.is_delete_requested() && filter.matches(t))
            .cloned()
            .collect();

        tasks.sort_by_key(|t| (t.created_at(), t.id()));
        if filter.newest_first {
            tasks.reverse();
        }
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        tasks
    }

    pub(crate) fn stage_insert(&self, task: Task) -> Change {
        Change::Put(task)
    }

    pub(crate) fn stage_update(
        &self,
        id: TaskId,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<Change, StoreError> {
        let Some(current) = self.records.get(&id) else {
            return Err(StoreError::NotFound(id));
        };

        let name = transition.name();
        let mut next = current.clone();
        match next.apply(transition, now) {
            Ok(()) => Ok(Change::Put(next)),
            // 実行中に削除された task: 結果は捨てて record を消す
            Err(TransitionError::Deleted) => Ok(Change::Remove(id)),
            Err(reason) => Err(StoreError::Conflict {
                id,
                transition: name,
                reason,
            }),
        }
    }

    pub(crate) fn stage_delete(&self, id: TaskId, now: DateTime<Utc>) -> Result<Change, StoreError> {
        match self.records.get(&id) {
            None => Err(StoreError::NotFound(id)),
            Some(task) if task.is_delete_requested() => Err(StoreError::NotFound(id)),
            Some(task) if task.state() == TaskState::Running => {
                let mut next = task.clone();
                next.request_delete(now);
                Ok(Change::Put(next))
            }
            Some(_) => Ok(Change::Remove(id)),
        }
    }

    pub(crate) fn commit(&mut self, change: &Change) {
        match change {
            Change::Put(task) => {
                self.records.insert(task.id(), task.clone());
            }
            Change::Remove(id) => {
                self.records.remove(id);
            }
        }
    }

    /// All records as they would be after `change`, for durable snapshots.
    pub(crate) fn snapshot_with<'a>(&'a self, change: &'a Change) -> Vec<&'a Task> {
        let (skip, extra) = match change {
            Change::Put(task) => (task.id(), Some(task)),
            Change::Remove(id) => (*id, None),
        };
        let mut out: Vec<&Task> = self.records.values().filter(|t| t.id() != skip).collect();
        out.extend(extra);
        out.sort_by_key(|t| (t.created_at(), t.id()));
        out
    }
}
