//! App - アプリケーション層
//!
//! ports を組み合わせて task のライフサイクルを動かす。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 構築とワイヤリング、起動時検証
//! - **WorkerPool**: 固定数スロットでの executor 実行
//! - **Dispatcher**: claim → 実行 → 結果記録 の調整ループ
//! - **Recovery**: 再起動時・lease 期限切れ時の孤児回収
//! - **TaskService**: 外部境界（submit / 参照 / 削除 / 統計）

pub mod builder;
pub(crate) mod dispatcher;
pub mod pool;
pub(crate) mod recovery;
pub mod service;
pub mod status;

pub use self::builder::{App, AppBuilder, BuildError, RunningApp};
pub use self::pool::{ExecutionReport, Job, Slot, WorkerPool};
pub use self::service::{ServiceError, TaskService};
pub use self::status::{ListFilter, TaskOutcome, TaskView};
