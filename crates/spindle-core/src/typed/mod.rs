//! Typed - executor の登録面
//!
//! # 二層構造
//! - **表層（Typed）**: `TaskKind` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `Executor` trait - object-safe, type erasure
//!
//! どちらで登録しても registry の中では `Arc<dyn Executor>` になる。

pub mod handler;
pub mod registry;
pub mod task;

pub use self::handler::{Executor, FnExecutor, Handler, TypedExecutor, executor_fn};
pub use self::registry::{ExecutorRegistry, RegistryError};
pub use self::task::TaskKind;
