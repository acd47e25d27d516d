//! ExecutorRegistry - task_type から Executor を引く表
//!
//! 起動時に一度だけ組み立て、以後は読み取り専用（`App` が `Arc` で共有する）。

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{Executor, Handler, TypedExecutor, executor_fn};
use super::task::TaskKind;
use crate::domain::{ExecutionError, TaskType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("executor for task type '{0}' is already registered")]
    AlreadyRegistered(TaskType),

    #[error("unknown task type: {0}")]
    UnknownType(TaskType),
}

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskType, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: impl Into<TaskType>,
        executor: impl Executor + 'static,
    ) -> Result<(), RegistryError> {
        self.insert(task_type.into(), Arc::new(executor))
    }

    pub fn register_fn<F, Fut>(&mut self, task_type: impl Into<TaskType>, f: F) -> Result<(), RegistryError>
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ExecutionError>> + Send + 'static,
    {
        self.register(task_type, executor_fn(f))
    }

    /// Register a typed handler under `T::TYPE`.
    pub fn register_typed<T: TaskKind, H: Handler<T> + 'static>(&mut self, handler: H) -> Result<(), RegistryError> {
        self.insert(T::task_type(), Arc::new(TypedExecutor::<T, H>::new(handler)))
    }

    fn insert(&mut self, task_type: TaskType, executor: Arc<dyn Executor>) -> Result<(), RegistryError> {
        if self.executors.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.executors.insert(task_type, executor);
        Ok(())
    }

    pub fn resolve(&self, task_type: &TaskType) -> Result<Arc<dyn Executor>, RegistryError> {
        self.executors
            .get(task_type)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownType(task_type.clone()))
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.executors.contains_key(task_type)
    }

    /// Registered types, sorted.
    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
