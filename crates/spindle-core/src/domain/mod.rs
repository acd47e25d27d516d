//! Domain model (IDs, task record, state machine, failures, retry decisions, stats).
//!
//! ここには I/O を持ち込まない。store・clock・executor はすべて ports 経由。

pub mod decision;
pub mod ids;
pub mod outcome;
pub mod retry;
pub mod state;
pub mod stats;
pub mod task;
pub mod task_type;

pub use decision::{Decider, Decision};
pub use ids::{CoordinatorId, LeaseId, ParseIdError, TaskId};
pub use outcome::{ExecutionError, Failure, FailureKind};
pub use retry::RetryPolicy;
pub use state::TaskState;
pub use stats::{PoolStats, StateCounts, Stats};
pub use task::{Lease, Task, Transition, TransitionError};
pub use task_type::TaskType;
