//! Aggregate statistics over a snapshot of task records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::state::TaskState;
use super::task::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StateCounts {
    fn bump(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Running => self.running += 1,
            TaskState::Completed => self.completed += 1,
            TaskState::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub size: usize,
    pub busy: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub counts: StateCounts,
    pub total: usize,

    pub window_secs: u64,

    /// Tasks that reached COMPLETED or FAILED inside the window.
    pub finished_in_window: usize,
    pub throughput_per_minute: f64,

    /// Mean of `completed_at - created_at` over COMPLETED tasks.
    pub average_latency_secs: Option<f64>,

    /// Retries over attempts, across all tasks (0.0 when nothing ran yet).
    pub retry_rate: f64,

    /// COMPLETED / (COMPLETED + FAILED) as a percentage.
    pub success_rate_percent: f64,

    pub pool: PoolStats,
}

impl Stats {
    pub fn collect(tasks: &[Task], now: DateTime<Utc>, window: std::time::Duration, pool: PoolStats) -> Self {
        let window_start = Duration::from_std(window)
            .ok()
            .and_then(|w| now.checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut counts = StateCounts::default();
        let mut finished_in_window = 0usize;
        let mut latency_ms_sum = 0i64;
        let mut attempts = 0u64;
        let mut retries = 0u64;

        for task in tasks {
            counts.bump(task.state());

            let attempt_count = u64::from(task.attempt_count());
            attempts += attempt_count;
            retries += attempt_count.saturating_sub(1);

            if let Some(completed_at) = task.completed_at() {
                if completed_at >= window_start && completed_at <= now {
                    finished_in_window += 1;
                }
                if task.state() == TaskState::Completed {
                    latency_ms_sum += (completed_at - task.created_at()).num_milliseconds();
                }
            }
        }

        let window_minutes = window.as_secs_f64() / 60.0;
        let throughput_per_minute = if window_minutes > 0.0 {
            finished_in_window as f64 / window_minutes
        } else {
            0.0
        };

        let average_latency_secs = (counts.completed > 0)
            .then(|| latency_ms_sum as f64 / counts.completed as f64 / 1000.0);

        let retry_rate = if attempts > 0 {
            retries as f64 / attempts as f64
        } else {
            0.0
        };

        let finished = counts.completed + counts.failed;
        let success_rate_percent = if finished > 0 {
            counts.completed as f64 / finished as f64 * 100.0
        } else {
            0.0
        };

        Self {
            counts,
            total: counts.total(),
            window_secs: window.as_secs(),
            finished_in_window,
            throughput_per_minute,
            average_latency_secs,
            retry_rate,
            success_rate_percent,
            pool,
        }
    }
}
