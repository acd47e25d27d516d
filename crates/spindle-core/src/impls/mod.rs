//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 開発・テスト用の正本
//! - **FileTaskStore**: JSON snapshot を atomic rename で書く永続版
//!
//! どちらも `table::TaskTable` の stage → commit を共有する。

mod table;

pub mod file_store;
pub mod memory_store;

pub use self::file_store::FileTaskStore;
pub use self::memory_store::InMemoryTaskStore;
