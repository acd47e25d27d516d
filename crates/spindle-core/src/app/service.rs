//! TaskService - 外部境界（submit / 参照 / 削除 / 統計）
//!
//! task 自体の失敗は task に記録されるだけで、ここから `Err` にはならない。
//! `Err` になるのは task が見つからないときと store が書けないときだけ。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use super::pool::WorkerPool;
use super::status::{ListFilter, TaskOutcome, TaskView};
use crate::domain::{PoolStats, Stats, TaskId, TaskType};
use crate::ports::{Clock, StoreError, TaskFilter, TaskStore};
use crate::typed::TaskKind;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("payload could not be encoded: {0}")]
    Encode(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::Store(other),
        }
    }
}

/// Cheap to clone; every clone talks to the same store and dispatcher.
#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    pool: Arc<WorkerPool>,
    clock: Arc<dyn Clock>,
    wake: Arc<Notify>,
    stats_window: Duration,
}

impl TaskService {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        pool: Arc<WorkerPool>,
        clock: Arc<dyn Clock>,
        wake: Arc<Notify>,
        stats_window: Duration,
    ) -> Self {
        Self {
            store,
            pool,
            clock,
            wake,
            stats_window,
        }
    }

    /// Persist a new PENDING task and wake the dispatcher.
    pub async fn submit_task(
        &self,
        task_type: impl Into<TaskType>,
        payload: serde_json::Value,
    ) -> Result<TaskId, ServiceError> {
        let task = self.store.create(task_type.into(), payload).await?;
        tracing::debug!(task_id = %task.id(), task_type = %task.task_type(), "task submitted");
        self.wake.notify_one();
        Ok(task.id())
    }

    /// Submit a typed payload under `T::TYPE`.
    pub async fn submit<T: TaskKind>(&self, task: &T) -> Result<TaskId, ServiceError> {
        let payload = serde_json::to_value(task)
            .map_err(|e| ServiceError::Encode(e.to_string()))?;
        self.submit_task(T::task_type(), payload).await
    }

    pub async fn get_task(&self, id: TaskId) -> Result<TaskView, ServiceError> {
        let task = self.store.get(id).await?;
        Ok(TaskView::from(&task))
    }

    pub async fn get_result(&self, id: TaskId) -> Result<TaskOutcome, ServiceError> {
        let task = self.store.get(id).await?;
        Ok(TaskOutcome::from(&task))
    }

    pub async fn list_tasks(&self, filter: &ListFilter) -> Result<Vec<TaskView>, ServiceError> {
        let tasks = self.store.list(&filter.to_store_filter()).await?;
        Ok(tasks.iter().map(TaskView::from).collect())
    }

    /// Delete a task. A RUNNING task disappears now; its outcome is dropped
    /// when it arrives.
    pub async fn delete_task(&self, id: TaskId) -> Result<(), ServiceError> {
        self.store.delete(id).await?;
        tracing::info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Read-only snapshot; never goes through the dispatcher.
    pub async fn get_stats(&self) -> Result<Stats, ServiceError> {
        let tasks = self.store.list(&TaskFilter::all()).await?;
        let pool = PoolStats {
            size: self.pool.size(),
            busy: self.pool.busy(),
        };
        Ok(Stats::collect(&tasks, self.clock.now(), self.stats_window, pool))
    }
}
