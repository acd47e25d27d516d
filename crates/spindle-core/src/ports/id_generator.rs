//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{CoordinatorId, LeaseId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は調整なしで一意な ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（store と dispatcher から共有される）
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_lease_id(&self) -> LeaseId;

    fn generate_coordinator_id(&self) -> CoordinatorId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// timestamp 部分は Clock から取るので、FixedClock を渡せば
/// テストでも timestamp が決定的になる。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }

    fn generate_lease_id(&self) -> LeaseId {
        LeaseId::from(self.next())
    }

    fn generate_coordinator_id(&self) -> CoordinatorId {
        CoordinatorId::from(self.next())
    }
}
