//! spindle-core
//!
//! Durable task lifecycle engine: submitted tasks are persisted, claimed under
//! a fixed concurrency budget, executed by registered executors, and retried
//! until they reach exactly one terminal state.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task_type, state, task, outcome, decision, retry, stats）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, IdGenerator）
//! - **impls**: ports の実装（InMemoryTaskStore, FileTaskStore）
//! - **typed**: executor の登録面（Executor, TaskKind, Handler, ExecutorRegistry）
//! - **app**: ワイヤリングと実行（AppBuilder, WorkerPool, Dispatcher, TaskService）
//! - **config**: エンジン設定値

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{App, AppBuilder, BuildError, ListFilter, RunningApp, ServiceError, TaskOutcome, TaskService, TaskView};
pub use config::{Config, ConfigError, StoreConfig};
pub use domain::{ExecutionError, Stats, TaskId, TaskState, TaskType};
pub use typed::{Executor, ExecutorRegistry, Handler, RegistryError, TaskKind, executor_fn};
