//! WorkerPool - 固定数の実行スロット
//!
//! スロットは `Semaphore` の owned permit。worker の future と一緒に drop
//! されるので、成功・失敗・panic・timeout のどの経路でも必ず返却される。
//!
//! pool は結果を解釈しない。`ExecutionReport` を dispatcher に送るだけ。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;

use crate::domain::{Failure, FailureKind, LeaseId, TaskId, TaskType};
use crate::typed::Executor;

/// One unit of reserved execution capacity.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

/// A claimed task, ready to run.
pub struct Job {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub lease: LeaseId,
    pub attempt: u32,
    pub executor: Arc<dyn Executor>,
    pub payload: Value,
}

/// What happened to one attempt.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub lease: LeaseId,
    pub attempt: u32,
    pub outcome: Result<Value, Failure>,
    pub elapsed: Duration,
}

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
    timeout: Option<Duration>,
    reports: mpsc::Sender<ExecutionReport>,
}

impl WorkerPool {
    /// A pool of `size` slots and the receiving end of its report channel.
    pub fn new(size: usize, timeout: Option<Duration>) -> (Self, mpsc::Receiver<ExecutionReport>) {
        // 各スロットが未送信の report を高々 1 つ持つので、size あれば送信は詰まらない
        let (tx, rx) = mpsc::channel(size.max(1));
        let pool = Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            timeout,
            reports: tx,
        };
        (pool, rx)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn busy(&self) -> usize {
        self.size.saturating_sub(self.available())
    }

    /// Reserve a slot if one is free right now.
    pub fn try_reserve(&self) -> Option<Slot> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| Slot { _permit: permit })
    }

    /// Wait for a free slot. `None` once the pool is closed.
    pub async fn reserve(&self) -> Option<Slot> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .ok()
            .map(|permit| Slot { _permit: permit })
    }

    /// Run `job`, waiting for a slot first if all are busy.
    pub async fn submit(&self, job: Job) -> Option<JoinHandle<()>> {
        let slot = self.reserve().await?;
        Some(self.spawn(slot, job))
    }

    /// Run `job` in an already reserved slot.
    ///
    /// The slot is released only after the report is handed to the channel.
    pub fn spawn(&self, slot: Slot, job: Job) -> JoinHandle<()> {
        let reports = self.reports.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = run_attempt(&job, timeout).await;

            let report = ExecutionReport {
                task_id: job.task_id,
                task_type: job.task_type,
                lease: job.lease,
                attempt: job.attempt,
                outcome,
                elapsed: started.elapsed(),
            };
            if reports.send(report).await.is_err() {
                tracing::debug!(task_id = %job.task_id, "dispatcher gone; report dropped");
            }
            drop(slot);
        })
    }

    /// Resolves once every slot is free.
    pub async fn wait_idle(&self) {
        let Ok(n) = u32::try_from(self.size) else {
            return;
        };
        // closed なら待つものはない
        let _ = self.semaphore.acquire_many(n).await;
    }

    /// Stop handing out slots. Running jobs are not affected.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Run the executor in a child task so a panic or a timeout abort stays
/// contained there.
async fn run_attempt(job: &Job, timeout: Option<Duration>) -> Result<Value, Failure> {
    let executor = Arc::clone(&job.executor);
    let payload = job.payload.clone();
    let mut child = tokio::spawn(async move { executor.execute(&payload).await });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut child).await {
            Ok(joined) => joined,
            Err(_) => {
                child.abort();
                tracing::warn!(
                    task_id = %job.task_id,
                    task_type = %job.task_type,
                    attempt = job.attempt,
                    timeout_ms = limit.as_millis() as u64,
                    "execution timed out"
                );
                return Err(Failure::timeout(limit));
            }
        },
        None => child.await,
    };

    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.into()),
        Err(err) if err.is_panic() => {
            tracing::error!(
                task_id = %job.task_id,
                task_type = %job.task_type,
                attempt = job.attempt,
                "executor panicked"
            );
            Err(Failure::panicked())
        }
        Err(err) => Err(Failure::new(FailureKind::Executor, format!("execution cancelled: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionError;
    use crate::typed::executor_fn;
    use serde_json::json;
    use ulid::Ulid;

    fn job(executor: impl Executor + 'static) -> Job {
        Job {
            task_id: TaskId::from_ulid(Ulid::new()),
            task_type: TaskType::new("t"),
            lease: LeaseId::from_ulid(Ulid::new()),
            attempt: 1,
            executor: Arc::new(executor),
            payload: json!({"n": 1}),
        }
    }

    #[tokio::test]
    async fn reports_success_and_releases_slot() {
        let (pool, mut reports) = WorkerPool::new(1, None);
        let slot = pool.try_reserve().unwrap();
        assert!(pool.try_reserve().is_none());

        pool.spawn(slot, job(executor_fn(|p| async move { Ok(p) })))
            .await
            .unwrap();

        let report = reports.recv().await.unwrap();
        assert_eq!(report.outcome, Ok(json!({"n": 1})));
        assert_eq!(pool.busy(), 0);
    }

    #[tokio::test]
    async fn executor_error_becomes_failure() {
        let (pool, mut reports) = WorkerPool::new(1, None);
        pool.submit(job(executor_fn(|_| async move {
            Err(ExecutionError::failed("smtp down"))
        })))
        .await
        .unwrap();

        let report = reports.recv().await.unwrap();
        let failure = report.outcome.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Executor);
        assert_eq!(failure.message, "smtp down");
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let (pool, mut reports) = WorkerPool::new(1, None);
        let handle = pool
            .submit(job(executor_fn(|p: Value| async move {
                if p["n"] == 1 {
                    panic!("boom");
                }
                Ok(p)
            })))
            .await
            .unwrap();

        assert!(handle.await.is_ok());
        let report = reports.recv().await.unwrap();
        assert_eq!(report.outcome.unwrap_err().kind, FailureKind::Panicked);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn timeout_aborts_and_frees_slot() {
        let (pool, mut reports) = WorkerPool::new(1, Some(Duration::from_millis(20)));
        pool.submit(job(executor_fn(|p| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(p)
        })))
        .await
        .unwrap();

        let report = reports.recv().await.unwrap();
        assert_eq!(report.outcome.unwrap_err().kind, FailureKind::Timeout);
        pool.wait_idle().await;
        assert_eq!(pool.busy(), 0);
    }

    #[tokio::test]
    async fn closed_pool_hands_out_nothing() {
        let (pool, _reports) = WorkerPool::new(2, None);
        pool.close();
        assert!(pool.try_reserve().is_none());
        assert!(pool.reserve().await.is_none());
    }

    #[tokio::test]
    async fn submit_waits_for_a_free_slot() {
        let (pool, mut reports) = WorkerPool::new(1, None);
        let pool = Arc::new(pool);
        let gate = Arc::new(tokio::sync::Notify::new());

        let held = Arc::clone(&gate);
        pool.submit(job(executor_fn(move |p| {
            let held = Arc::clone(&held);
            async move {
                held.notified().await;
                Ok(p)
            }
        })))
        .await
        .unwrap();

        let waiting = Arc::clone(&pool);
        let mut second = tokio::spawn(async move {
            waiting.submit(job(executor_fn(|p| async move { Ok(p) }))).await
        });
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut second).await.is_err(),
            "second submit started while the only slot was busy"
        );
        assert_eq!(pool.busy(), 1);

        gate.notify_one();
        assert!(reports.recv().await.unwrap().outcome.is_ok());

        second.await.unwrap().unwrap().await.unwrap();
        assert!(reports.recv().await.unwrap().outcome.is_ok());
        assert_eq!(pool.busy(), 0);
    }
}
