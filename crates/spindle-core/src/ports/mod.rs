//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（永続化、時刻、ID 採番）へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。実装は `impls` に置く。

pub mod clock;
pub mod id_generator;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock, after};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{StoreError, TaskFilter, TaskStore};
