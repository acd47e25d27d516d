//! Task record: the unit of work plus its lifecycle metadata.
//!
//! Design:
//! - `Task` is what the store persists; it is the single source of truth.
//! - Every state change goes through `Task::apply(Transition)`, which checks
//!   the transition's precondition first. Stores call it under their lock, so
//!   a failed precondition is a lost compare-and-set, never a partial write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CoordinatorId, LeaseId, TaskId};
use super::state::TaskState;
use super::task_type::TaskType;

/// The claim token held by a RUNNING task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub id: LeaseId,
    pub holder: CoordinatorId,
    pub acquired_at: DateTime<Utc>,

    /// `None` means the lease never expires (only restart recovery frees it).
    pub expires_at: Option<DateTime<Utc>>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    task_type: TaskType,
    payload: serde_json::Value,
    state: TaskState,

    /// Number of execution attempts started so far.
    attempt_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,

    /// Terminal failure description (FAILED only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,

    /// Most recent failure while a retry is pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    eligible_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    lease: Option<Lease>,

    /// Deleted while RUNNING: hidden from reads, removed when its outcome arrives.
    #[serde(default)]
    delete_requested: bool,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

/// A state change plus the precondition it requires.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// PENDING -> RUNNING. Requires the task to be eligible at `now`.
    Claim {
        lease: Lease,
        /// Whether this claim starts an execution attempt.
        count_attempt: bool,
    },

    /// RUNNING -> COMPLETED.
    Complete {
        lease: LeaseId,
        result: serde_json::Value,
    },

    /// RUNNING -> PENDING, claimable again from `eligible_at`.
    Retry {
        lease: LeaseId,
        error: String,
        eligible_at: DateTime<Utc>,
    },

    /// RUNNING -> FAILED.
    Fail { lease: LeaseId, error: String },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Claim { .. } => "claim",
            Transition::Complete { .. } => "complete",
            Transition::Retry { .. } => "retry",
            Transition::Fail { .. } => "fail",
        }
    }
}

/// Why a transition's precondition did not hold.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("expected state {expected}, found {actual}")]
    StateMismatch {
        expected: TaskState,
        actual: TaskState,
    },

    #[error("task is not eligible until {0}")]
    NotEligible(DateTime<Utc>),

    #[error("lease {presented} does not hold the task")]
    LeaseMismatch { presented: LeaseId },

    #[error("task was deleted while running")]
    Deleted,
}

impl Task {
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            payload,
            state: TaskState::Pending,
            attempt_count: 0,
            result: None,
            error: None,
            last_error: None,
            eligible_at: None,
            lease: None,
            delete_requested: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn eligible_at(&self) -> Option<DateTime<Utc>> {
        self.eligible_at
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn is_delete_requested(&self) -> bool {
        self.delete_requested
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// PENDING and past its retry delay.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Pending && self.eligible_at.is_none_or(|at| at <= now)
    }

    /// RUNNING with a lease that has expired.
    pub fn is_lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Running && self.lease.as_ref().is_some_and(|l| l.is_expired(now))
    }

    /// Apply a transition if its precondition holds.
    ///
    /// On error the record is left untouched.
    pub fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<(), TransitionError> {
        match transition {
            Transition::Claim {
                lease,
                count_attempt,
            } => {
                self.expect_state(TaskState::Pending)?;
                if let Some(at) = self.eligible_at.filter(|at| *at > now) {
                    return Err(TransitionError::NotEligible(at));
                }
                self.state = TaskState::Running;
                self.lease = Some(lease);
                self.eligible_at = None;
                if count_attempt {
                    self.attempt_count += 1;
                }
            }
            Transition::Complete { lease, result } => {
                self.expect_lease(lease)?;
                self.state = TaskState::Completed;
                self.result = Some(result);
                self.error = None;
                self.last_error = None;
                self.lease = None;
                self.completed_at = Some(now);
            }
            Transition::Retry {
                lease,
                error,
                eligible_at,
            } => {
                self.expect_lease(lease)?;
                self.state = TaskState::Pending;
                self.last_error = Some(error);
                self.eligible_at = Some(eligible_at);
                self.lease = None;
            }
            Transition::Fail { lease, error } => {
                self.expect_lease(lease)?;
                self.state = TaskState::Failed;
                self.last_error = Some(error.clone());
                self.error = Some(error);
                self.result = None;
                self.lease = None;
                self.completed_at = Some(now);
            }
        }
        self.updated_at = now;
        Ok(())
    }

    /// Flag a RUNNING task for deletion.
    pub fn request_delete(&mut self, now: DateTime<Utc>) {
        self.delete_requested = true;
        self.updated_at = now;
    }

    fn expect_state(&self, expected: TaskState) -> Result<(), TransitionError> {
        if self.state != expected {
            return Err(TransitionError::StateMismatch {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn expect_lease(&self, presented: LeaseId) -> Result<(), TransitionError> {
        if self.delete_requested {
            return Err(TransitionError::Deleted);
        }
        self.expect_state(TaskState::Running)?;
        match &self.lease {
            Some(lease) if lease.id == presented => Ok(()),
            _ => Err(TransitionError::LeaseMismatch { presented }),
        }
    }
}
