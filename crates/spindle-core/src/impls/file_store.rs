//! FileTaskStore - JSON snapshot file を正本とする TaskStore
//!
//! 変更のたびに全 record を `<path>.tmp` に書き、rename で差し替える。
//! 書き込みに失敗した変更はメモリにも反映しない（fail closed）。
//!
//! writer は `write` lock で直列化し、disk I/O の間は table を lock しない。
//! 読み取り（get / list / stats）が待つのは commit の一瞬だけ。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::table::{Change, TaskTable};
use crate::domain::{Task, TaskId, TaskType, Transition};
use crate::ports::{Clock, IdGenerator, StoreError, SystemClock, TaskFilter, TaskStore, UlidGenerator};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    tasks: Vec<&'a Task>,
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    tasks: Vec<Task>,
}

pub struct FileTaskStore {
    path: PathBuf,
    tmp_path: PathBuf,
    table: RwLock<TaskTable>,
    /// Held from staging until commit so a staged change stays valid.
    write: Mutex<()>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
}

impl FileTaskStore {
    /// Open (or create) the snapshot at `path` and load every record in it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| unavailable("create directory", dir, e))?;
        }

        let table = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Unavailable(format!("corrupt snapshot {}: {e}", path.display())))?;
                if snapshot.version != SNAPSHOT_VERSION {
                    return Err(StoreError::Unavailable(format!(
                        "unsupported snapshot version {} in {}",
                        snapshot.version,
                        path.display()
                    )));
                }
                TaskTable::from_records(snapshot.tasks)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TaskTable::new(),
            Err(e) => return Err(unavailable("read", &path, e)),
        };

        tracing::info!(path = %path.display(), tasks = table.len(), "opened task store");

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");

        Ok(Self {
            tmp_path: PathBuf::from(tmp),
            path,
            table: RwLock::new(table),
            write: Mutex::new(()),
            ids: Box::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably write the table as it would be after `change`, then apply it.
    ///
    /// Callers must hold `write`.
    async fn persist_and_commit(&self, change: &Change) -> Result<(), StoreError> {
        let bytes = {
            let table = self.table.read().await;
            let snapshot = SnapshotRef {
                version: SNAPSHOT_VERSION,
                tasks: table.snapshot_with(change),
            };
            serde_json::to_vec_pretty(&snapshot)
                .map_err(|e| StoreError::Unavailable(format!("encode snapshot: {e}")))?
        };

        tokio::fs::write(&self.tmp_path, &bytes)
            .await
            .map_err(|e| unavailable("write", &self.tmp_path, e))?;
        tokio::fs::rename(&self.tmp_path, &self.path)
            .await
            .map_err(|e| unavailable("rename", &self.path, e))?;

        self.table.write().await.commit(change);
        Ok(())
    }
}

fn unavailable(op: &str, path: &Path, err: std::io::Error) -> StoreError {
    tracing::warn!(path = %path.display(), error = %err, "task store {op} failed");
    StoreError::Unavailable(format!("{op} {}: {err}", path.display()))
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn create(&self, task_type: TaskType, payload: serde_json::Value) -> Result<Task, StoreError> {
        let _writer = self.write.lock().await;
        let task = Task::new(self.ids.generate_task_id(), task_type, payload, self.clock.now());
        let change = self.table.read().await.stage_insert(task.clone());
        self.persist_and_commit(&change).await?;
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        self.table.read().await.get(id)
    }

    async fn update(&self, id: TaskId, transition: Transition) -> Result<Task, StoreError> {
        let _writer = self.write.lock().await;
        let change = self.table.read().await.stage_update(id, transition, self.clock.now())?;
        self.persist_and_commit(&change).await?;
        change.into_task()
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        Ok(self.table.read().await.list(filter))
    }

    async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        let _writer = self.write.lock().await;
        let change = self.table.read().await.stage_delete(id, self.clock.now())?;
        self.persist_and_commit(&change).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CoordinatorId, Lease, LeaseId, TaskState};
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;
    use ulid::Ulid;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("spindle-store-{}", Ulid::new()))
    }

    fn lease() -> Lease {
        Lease {
            id: LeaseId::from_ulid(Ulid::new()),
            holder: CoordinatorId::from_ulid(Ulid::new()),
            acquired_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = scratch_dir();
        let path = dir.join("tasks.json");

        let (done, waiting) = {
            let store = FileTaskStore::open(&path).await.unwrap();
            let done = store.create(TaskType::new("email"), json!({"n": 1})).await.unwrap();
            let waiting = store.create(TaskType::new("report"), json!({"n": 2})).await.unwrap();

            let l = lease();
            let lease_id = l.id;
            store
                .update(
                    done.id(),
                    Transition::Claim {
                        lease: l,
                        count_attempt: true,
                    },
                )
                .await
                .unwrap();
            store
                .update(
                    done.id(),
                    Transition::Complete {
                        lease: lease_id,
                        result: json!("sent"),
                    },
                )
                .await
                .unwrap();
            (done, waiting)
        };

        let reopened = FileTaskStore::open(&path).await.unwrap();
        let done = reopened.get(done.id()).await.unwrap();
        assert_eq!(done.state(), TaskState::Completed);
        assert_eq!(done.result(), Some(&json!("sent")));
        assert_eq!(done.attempt_count(), 1);

        let waiting = reopened.get(waiting.id()).await.unwrap();
        assert_eq!(waiting.state(), TaskState::Pending);
        assert_eq!(waiting.payload(), &json!({"n": 2}));

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn deletions_are_persisted() {
        let dir = scratch_dir();
        let path = dir.join("tasks.json");

        let store = FileTaskStore::open(&path).await.unwrap();
        let gone = store.create(TaskType::new("t"), json!(null)).await.unwrap();
        let kept = store.create(TaskType::new("t"), json!(null)).await.unwrap();
        store.delete(gone.id()).await.unwrap();
        drop(store);

        let reopened = FileTaskStore::open(&path).await.unwrap();
        assert!(matches!(reopened.get(gone.id()).await, Err(StoreError::NotFound(_))));
        assert!(reopened.get(kept.id()).await.is_ok());

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn running_task_deleted_before_restart_is_dropped() {
        let dir = scratch_dir();
        let path = dir.join("tasks.json");

        let store = FileTaskStore::open(&path).await.unwrap();
        let task = store.create(TaskType::new("t"), json!(null)).await.unwrap();
        store
            .update(
                task.id(),
                Transition::Claim {
                    lease: lease(),
                    count_attempt: true,
                },
            )
            .await
            .unwrap();
        store.delete(task.id()).await.unwrap();
        drop(store);

        let reopened = FileTaskStore::open(&path).await.unwrap();
        assert!(reopened.list(&TaskFilter::all()).await.unwrap().is_empty());

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn failed_write_leaves_state_unchanged() {
        let dir = scratch_dir();
        let path = dir.join("tasks.json");

        let store = FileTaskStore::open(&path).await.unwrap();
        let task = store.create(TaskType::new("t"), json!(null)).await.unwrap();

        // tmp の位置にディレクトリを置くと write が失敗する
        std::fs::create_dir_all(&store.tmp_path).unwrap();

        let err = store
            .update(
                task.id(),
                Transition::Claim {
                    lease: lease(),
                    count_attempt: true,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(store.get(task.id()).await.unwrap().state(), TaskState::Pending);

        let err = store.create(TaskType::new("t"), json!(null)).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(store.list(&TaskFilter::all()).await.unwrap().len(), 1);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_rejected() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tasks.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = FileTaskStore::open(&path).await.err().unwrap();
        assert!(err.is_unavailable());

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn reads_do_not_wait_for_an_in_progress_write() {
        let dir = scratch_dir();
        let path = dir.join("tasks.json");

        let store = FileTaskStore::open(&path).await.unwrap();
        let task = store.create(TaskType::new("t"), json!(null)).await.unwrap();

        // writer が disk I/O 中の状態を再現する
        let writer = store.write.lock().await;

        let listed = tokio::time::timeout(Duration::from_millis(500), store.list(&TaskFilter::all()))
            .await
            .expect("list blocked behind the writer")
            .unwrap();
        assert_eq!(listed.len(), 1);

        let fetched = tokio::time::timeout(Duration::from_millis(500), store.get(task.id()))
            .await
            .expect("get blocked behind the writer")
            .unwrap();
        assert_eq!(fetched.state(), TaskState::Pending);

        drop(writer);
        std::fs::remove_dir_all(dir).ok();
    }
}
