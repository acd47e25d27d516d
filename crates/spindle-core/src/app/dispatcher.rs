//! Dispatcher - claim と結果記録を一手に担う調整ループ
//!
//! # 1 tick の流れ
//! 1. 空きスロットを確保（try_reserve）
//! 2. 溜まっている ExecutionReport を記録（解放済みスロットの結果を、
//!    そのスロットが再利用される前に store へ書く）
//! 3. eligible な PENDING を確保数だけ FIFO で取得
//! 4. executor を解決して CAS で claim（競合は黙って skip）
//! 5. 未登録 type は即 FAILED、それ以外は確保済みスロットで実行
//!
//! 起床条件: submit 通知 / report 到着 / poll_interval ごと。
//!
//! store が Unavailable の間は 100ms から 5s まで倍々で待って同じ操作をやり直す。
//! durable に書けるまで task を終端にはしない。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use super::pool::{ExecutionReport, Job, Slot, WorkerPool};
use super::recovery::Recovery;
use crate::domain::{CoordinatorId, Decider, Decision, Lease, Task, TaskId, Transition};
use crate::ports::{Clock, IdGenerator, StoreError, TaskFilter, TaskStore, after};
use crate::typed::ExecutorRegistry;

const STORE_BACKOFF_START: Duration = Duration::from_millis(100);
const STORE_BACKOFF_MAX: Duration = Duration::from_secs(5);

pub(crate) struct Dispatcher {
    pub(crate) coordinator: CoordinatorId,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) registry: Arc<ExecutorRegistry>,
    pub(crate) decider: Arc<dyn Decider>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) reports: mpsc::Receiver<ExecutionReport>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) recovery: Recovery,
    pub(crate) lease_duration: Option<Duration>,
    pub(crate) poll_interval: Duration,
    pub(crate) shutdown_grace: Duration,
    pub(crate) wake: Arc<Notify>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    pub(crate) async fn run(mut self) {
        tracing::info!(
            coordinator = %self.coordinator,
            pool_size = self.pool.size(),
            executors = self.registry.len(),
            "dispatcher started"
        );

        match self.with_store_retry("recover", || self.recovery.recover_all()).await {
            Some(Ok(0)) | None => {}
            Some(Ok(n)) => tracing::warn!(recovered = n, "recovered tasks left RUNNING by a previous run"),
            Some(Err(e)) => tracing::warn!(error = %e, "startup recovery failed"),
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.is_shutting_down() {
                break;
            }
            self.tick().await;

            tokio::select! {
                changed = self.shutdown.changed() => {
                    // sender が消えたら止める合図とみなす
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.wake.notified() => {}
                Some(report) = self.reports.recv() => self.record(report).await,
                _ = ticker.tick() => self.sweep_leases().await,
            }
        }

        self.drain().await;
        tracing::info!(coordinator = %self.coordinator, "dispatcher stopped");
    }

    async fn tick(&mut self) {
        let mut slots: Vec<Slot> = std::iter::from_fn(|| self.pool.try_reserve()).collect();

        while let Ok(report) = self.reports.try_recv() {
            self.record(report).await;
        }

        if slots.is_empty() {
            return;
        }

        let filter = TaskFilter::ready(self.clock.now()).with_limit(slots.len());
        let ready = match self.with_store_retry("list ready", || self.store.list(&filter)).await {
            Some(Ok(tasks)) => tasks,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "listing ready tasks failed");
                return;
            }
            None => return,
        };
        tracing::debug!(free = slots.len(), ready = ready.len(), "tick");

        for task in ready {
            let Some(slot) = slots.pop() else {
                break;
            };
            if let Some(slot) = self.dispatch(task, slot).await {
                slots.push(slot);
            }
        }
    }

    /// Claim `task` and start it. Hands the slot back if it went unused.
    async fn dispatch(&self, task: Task, slot: Slot) -> Option<Slot> {
        let executor = self.registry.resolve(task.task_type());
        let lease = self.new_lease();
        let lease_id = lease.id;
        let claim = Transition::Claim {
            lease,
            count_attempt: executor.is_ok(),
        };

        let claimed = match self
            .with_store_retry("claim", || self.store.update(task.id(), claim.clone()))
            .await
        {
            Some(Ok(claimed)) => claimed,
            Some(Err(e @ (StoreError::Conflict { .. } | StoreError::NotFound(_)))) => {
                tracing::debug!(task_id = %task.id(), reason = %e, "claim lost");
                return Some(slot);
            }
            Some(Err(e)) => {
                tracing::warn!(task_id = %task.id(), error = %e, "claim failed");
                return Some(slot);
            }
            None => return Some(slot),
        };

        match executor {
            Ok(executor) => {
                tracing::debug!(
                    task_id = %claimed.id(),
                    task_type = %claimed.task_type(),
                    attempt = claimed.attempt_count(),
                    lease = %lease_id,
                    "claimed"
                );
                self.pool.spawn(
                    slot,
                    Job {
                        task_id: claimed.id(),
                        task_type: claimed.task_type().clone(),
                        lease: lease_id,
                        attempt: claimed.attempt_count(),
                        executor,
                        payload: claimed.payload().clone(),
                    },
                );
                None
            }
            Err(err) => {
                tracing::warn!(
                    task_id = %claimed.id(),
                    task_type = %claimed.task_type(),
                    "no executor registered; failing task"
                );
                self.finish(
                    claimed.id(),
                    Transition::Fail {
                        lease: lease_id,
                        error: err.to_string(),
                    },
                )
                .await;
                Some(slot)
            }
        }
    }

    /// Turn an execution report into COMPLETED, a scheduled retry, or FAILED.
    async fn record(&self, report: ExecutionReport) {
        let ExecutionReport {
            task_id,
            task_type,
            lease,
            attempt,
            outcome,
            elapsed,
        } = report;

        let transition = match outcome {
            Ok(result) => {
                tracing::info!(
                    %task_id,
                    %task_type,
                    attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "task completed"
                );
                Transition::Complete { lease, result }
            }
            Err(failure) => match self.decider.decide(attempt.saturating_sub(1), &failure) {
                Decision::RetryAfter(delay) => {
                    tracing::warn!(
                        %task_id,
                        %task_type,
                        attempt,
                        kind = ?failure.kind,
                        error = %failure,
                        retry_in_ms = delay.as_millis() as u64,
                        "attempt failed; retry scheduled"
                    );
                    Transition::Retry {
                        lease,
                        error: failure.to_string(),
                        eligible_at: after(self.clock.now(), delay),
                    }
                }
                Decision::GiveUp => {
                    tracing::info!(
                        %task_id,
                        %task_type,
                        attempt,
                        kind = ?failure.kind,
                        error = %failure,
                        "attempt failed; giving up"
                    );
                    Transition::Fail {
                        lease,
                        error: failure.to_string(),
                    }
                }
            },
        };

        self.finish(task_id, transition).await;
    }

    /// Write a RUNNING-only transition, retrying through store outages.
    async fn finish(&self, task_id: TaskId, transition: Transition) {
        let name = transition.name();
        match self
            .with_store_retry(name, || self.store.update(task_id, transition.clone()))
            .await
        {
            Some(Ok(_)) => {}
            Some(Err(StoreError::NotFound(_))) => {
                tracing::info!(%task_id, "task deleted while running; outcome discarded");
            }
            Some(Err(e)) => {
                tracing::warn!(%task_id, transition = name, error = %e, "outcome not recorded");
            }
            None => {
                tracing::warn!(%task_id, transition = name, "shut down before outcome was recorded");
            }
        }
    }

    async fn sweep_leases(&self) {
        if self.lease_duration.is_none() {
            return;
        }
        match self.recovery.reap_expired().await {
            Ok(0) => {}
            Ok(n) => tracing::warn!(recovered = n, "recovered tasks with expired leases"),
            Err(e) => tracing::warn!(error = %e, "lease sweep failed"),
        }
    }

    /// Stop claiming, then give in-flight executions `shutdown_grace` to report.
    async fn drain(&mut self) {
        let in_flight = self.pool.busy();
        if in_flight > 0 {
            tracing::info!(in_flight, grace_ms = self.shutdown_grace.as_millis() as u64, "draining");
            let deadline = Instant::now() + self.shutdown_grace;
            loop {
                tokio::select! {
                    Some(report) = self.reports.recv() => self.record(report).await,
                    _ = self.pool.wait_idle() => break,
                    _ = tokio::time::sleep_until(deadline) => {
                        tracing::warn!(
                            in_flight = self.pool.busy(),
                            "grace period over; unfinished tasks stay RUNNING until recovered"
                        );
                        break;
                    }
                }
            }
        }

        while let Ok(report) = self.reports.try_recv() {
            self.record(report).await;
        }
        self.pool.close();
    }

    fn new_lease(&self) -> Lease {
        let now = self.clock.now();
        Lease {
            id: self.ids.generate_lease_id(),
            holder: self.coordinator,
            acquired_at: now,
            expires_at: self.lease_duration.map(|d| after(now, d)),
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run `op` until it returns something other than `Unavailable`.
    ///
    /// `None` means shutdown was requested while the store was unavailable.
    async fn with_store_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Option<Result<T, StoreError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut shutdown = self.shutdown.clone();
        let mut backoff = STORE_BACKOFF_START;
        loop {
            match op().await {
                Err(e) if e.is_unavailable() => {
                    if *shutdown.borrow() {
                        return None;
                    }
                    tracing::warn!(op = what, error = %e, retry_in_ms = backoff.as_millis() as u64, "store unavailable");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => return None,
                    }
                    backoff = (backoff * 2).min(STORE_BACKOFF_MAX);
                }
                other => return Some(other),
            }
        }
    }
}

