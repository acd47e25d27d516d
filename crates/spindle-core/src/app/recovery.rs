//! Recovery - 持ち主のいない RUNNING task の回収
//!
//! # フロー
//! 1. 起動時: RUNNING の task はすべて前のプロセスの残骸として扱う
//! 2. 定期 sweep: lease が期限切れの RUNNING task を回収する
//! 3. どちらも decider に `FailureKind::Orphaned` として判断させ、
//!    PENDING（即時 eligible、attempt_count はそのまま）か FAILED にする
//!
//! 遷移は読んだ時点の lease id を提示する CAS なので、回収と本来の完了報告が
//! 競合しても勝つのはどちらか一方だけ。

use std::sync::Arc;

use crate::domain::{Decider, Decision, Failure, Task, TaskState, Transition};
use crate::ports::{Clock, StoreError, TaskFilter, TaskStore};

pub(crate) const BUDGET_EXHAUSTED: &str = "orphaned: retry budget exhausted";

pub(crate) struct Recovery {
    store: Arc<dyn TaskStore>,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
}

impl Recovery {
    pub(crate) fn new(store: Arc<dyn TaskStore>, decider: Arc<dyn Decider>, clock: Arc<dyn Clock>) -> Self {
        Self { store, decider, clock }
    }

    /// Recover every RUNNING task. Run once before dispatching starts.
    pub(crate) async fn recover_all(&self) -> Result<usize, StoreError> {
        let running = self.store.list(&TaskFilter::in_state(TaskState::Running)).await?;
        self.recover_each(running).await
    }

    /// Recover RUNNING tasks whose lease has expired.
    pub(crate) async fn reap_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let expired: Vec<Task> = self
            .store
            .list(&TaskFilter::in_state(TaskState::Running))
            .await?
            .into_iter()
            .filter(|t| t.is_lease_expired(now))
            .collect();
        self.recover_each(expired).await
    }

    async fn recover_each(&self, tasks: Vec<Task>) -> Result<usize, StoreError> {
        let mut recovered = 0;
        for task in tasks {
            if self.recover(&task).await? {
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Ok(false) when someone else moved the task first.
    async fn recover(&self, task: &Task) -> Result<bool, StoreError> {
        let Some(lease) = task.lease() else {
            tracing::warn!(task_id = %task.id(), "RUNNING task without a lease; skipped");
            return Ok(false);
        };

        let failure = Failure::orphaned();
        let retries_used = task.attempt_count().saturating_sub(1);
        let (transition, requeued) = match self.decider.decide(retries_used, &failure) {
            Decision::RetryAfter(_) => (
                Transition::Retry {
                    lease: lease.id,
                    error: failure.message.clone(),
                    eligible_at: self.clock.now(),
                },
                true,
            ),
            Decision::GiveUp => (
                Transition::Fail {
                    lease: lease.id,
                    error: BUDGET_EXHAUSTED.to_string(),
                },
                false,
            ),
        };

        match self.store.update(task.id(), transition).await {
            Ok(_) => {
                tracing::warn!(
                    task_id = %task.id(),
                    task_type = %task.task_type(),
                    attempt = task.attempt_count(),
                    lease = %lease.id,
                    holder = %lease.holder,
                    requeued,
                    "recovered orphaned task"
                );
                Ok(true)
            }
            Err(StoreError::Conflict { .. }) | Err(StoreError::NotFound(_)) => {
                tracing::debug!(task_id = %task.id(), "orphan already resolved elsewhere");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
