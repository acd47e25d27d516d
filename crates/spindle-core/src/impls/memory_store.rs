//! InMemoryTaskStore - 開発・テスト用の正本
//!
//! 永続化はしない。プロセスが落ちれば record も消える。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::table::TaskTable;
use crate::domain::{Task, TaskId, TaskType, Transition};
use crate::ports::{Clock, IdGenerator, StoreError, SystemClock, TaskFilter, TaskStore, UlidGenerator};

pub struct InMemoryTaskStore {
    table: Mutex<TaskTable>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Mutex::new(TaskTable::new()),
            ids: Box::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task_type: TaskType, payload: serde_json::Value) -> Result<Task, StoreError> {
        let mut table = self.table.lock().await;
        let task = Task::new(self.ids.generate_task_id(), task_type, payload, self.clock.now());
        let change = table.stage_insert(task.clone());
        table.commit(&change);
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        self.table.lock().await.get(id)
    }

    async fn update(&self, id: TaskId, transition: Transition) -> Result<Task, StoreError> {
        let mut table = self.table.lock().await;
        let change = table.stage_update(id, transition, self.clock.now())?;
        table.commit(&change);
        change.into_task()
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        Ok(self.table.lock().await.list(filter))
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        let change = table.stage_delete(id, self.clock.now())?;
        table.commit(&change);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CoordinatorId, Lease, LeaseId, TaskState, TransitionError};
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;
    use tokio::task::JoinSet;
    use ulid::Ulid;

    fn lease() -> Lease {
        Lease {
            id: LeaseId::from_ulid(Ulid::new()),
            holder: CoordinatorId::from_ulid(Ulid::new()),
            acquired_at: Utc::now(),
            expires_at: None,
        }
    }

    fn claim(l: Lease) -> Transition {
        Transition::Claim {
            lease: l,
            count_attempt: true,
        }
    }

    #[tokio::test]
    async fn create_then_get_is_pending() {
        let store = InMemoryTaskStore::new();
        let task = store.create(TaskType::new("email"), json!({"to": "x"})).await.unwrap();

        let fetched = store.get(task.id()).await.unwrap();
        assert_eq!(fetched.state(), TaskState::Pending);
        assert_eq!(fetched.attempt_count(), 0);
        assert_eq!(fetched.payload(), &json!({"to": "x"}));
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::from_ulid(Ulid::new());
        assert_eq!(store.get(id).await.unwrap_err(), StoreError::NotFound(id));
    }

    #[tokio::test]
    async fn update_refreshes_updated_at() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(t0));
        let store = InMemoryTaskStore::with_clock(clock.clone());
        let task = store.create(TaskType::new("t"), json!({})).await.unwrap();

        clock.advance(Duration::from_secs(5));
        let claimed = store.update(task.id(), claim(lease())).await.unwrap();

        assert_eq!(claimed.created_at(), t0);
        assert_eq!(claimed.updated_at(), clock.now());
    }

    #[tokio::test]
    async fn racing_claims_admit_exactly_one() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = store.create(TaskType::new("t"), json!({})).await.unwrap();

        let mut set = JoinSet::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            let id = task.id();
            set.spawn(async move { store.update(id, claim(lease())).await });
        }

        let mut won = 0;
        let mut lost = 0;
        while let Some(res) = set.join_next().await {
            match res.unwrap() {
                Ok(_) => won += 1,
                Err(StoreError::Conflict { .. }) => lost += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(lost, 31);
        assert_eq!(store.get(task.id()).await.unwrap().attempt_count(), 1);
    }

    #[tokio::test]
    async fn conflict_reports_reason() {
        let store = InMemoryTaskStore::new();
        let task = store.create(TaskType::new("t"), json!({})).await.unwrap();
        store.update(task.id(), claim(lease())).await.unwrap();

        let err = store
            .update(
                task.id(),
                Transition::Complete {
                    lease: LeaseId::from_ulid(Ulid::new()),
                    result: json!(1),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                transition: "complete",
                reason: TransitionError::LeaseMismatch { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn list_filters_and_orders() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(t0));
        let store = InMemoryTaskStore::with_clock(clock.clone());

        let a = store.create(TaskType::new("email"), json!(1)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        let b = store.create(TaskType::new("report"), json!(2)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        let c = store.create(TaskType::new("email"), json!(3)).await.unwrap();
        store.update(b.id(), claim(lease())).await.unwrap();

        let ids = |tasks: Vec<Task>| tasks.iter().map(Task::id).collect::<Vec<_>>();

        let all = store.list(&TaskFilter::all()).await.unwrap();
        assert_eq!(ids(all), vec![a.id(), b.id(), c.id()]);

        let newest = store.list(&TaskFilter::all().newest_first().with_limit(2)).await.unwrap();
        assert_eq!(ids(newest), vec![c.id(), b.id()]);

        let emails = store
            .list(&TaskFilter::all().with_type(TaskType::new("email")))
            .await
            .unwrap();
        assert_eq!(ids(emails), vec![a.id(), c.id()]);

        let ready = store.list(&TaskFilter::ready(clock.now())).await.unwrap();
        assert_eq!(ids(ready), vec![a.id(), c.id()]);

        let running = store.list(&TaskFilter::in_state(TaskState::Running)).await.unwrap();
        assert_eq!(ids(running), vec![b.id()]);
    }

    #[tokio::test]
    async fn delete_pending_removes_outright() {
        let store = InMemoryTaskStore::new();
        let task = store.create(TaskType::new("t"), json!({})).await.unwrap();

        store.delete(task.id()).await.unwrap();
        assert!(matches!(store.get(task.id()).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete(task.id()).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_running_discards_late_outcome() {
        let store = InMemoryTaskStore::new();
        let task = store.create(TaskType::new("t"), json!({})).await.unwrap();
        let l = lease();
        let lease_id = l.id;
        store.update(task.id(), claim(l)).await.unwrap();

        store.delete(task.id()).await.unwrap();
        assert!(matches!(store.get(task.id()).await, Err(StoreError::NotFound(_))));
        assert!(store.list(&TaskFilter::all()).await.unwrap().is_empty());

        let late = store
            .update(
                task.id(),
                Transition::Complete {
                    lease: lease_id,
                    result: json!("late"),
                },
            )
            .await;
        assert_eq!(late.unwrap_err(), StoreError::NotFound(task.id()));
        assert_eq!(store.table.lock().await.len(), 0);
    }
}
