//! Executor / Handler - task を実行するルーチンの定義
//!
//! # 二層構造
//! - **Executor**: object-safe。registry は `Arc<dyn Executor>` で保持する
//! - **Handler<T>**: 型付き。`TypedExecutor` が `Executor` に型消去する
//!
//! Executor は同じ payload で複数回呼ばれうる（at-least-once）。冪等に書くこと。

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::task::TaskKind;
use crate::domain::ExecutionError;

/// Runs a task's payload and produces its result.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, payload: &Value) -> Result<Value, ExecutionError>;
}

/// Typed counterpart of `Executor`.
///
/// `Handler<SendEmail>` only ever sees a decoded `SendEmail`; payloads that
/// do not decode fail with `ExecutionError::InvalidPayload` before it runs.
#[async_trait]
pub trait Handler<T: TaskKind>: Send + Sync {
    type Output: Serialize + Send;

    async fn handle(&self, task: T) -> Result<Self::Output, ExecutionError>;
}

pub struct TypedExecutor<T, H> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TaskKind, H: Handler<T>> TypedExecutor<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskKind, H: Handler<T>> Executor for TypedExecutor<T, H> {
    async fn execute(&self, payload: &Value) -> Result<Value, ExecutionError> {
        let task: T = serde_json::from_value(payload.clone())
            .map_err(|e| ExecutionError::InvalidPayload(e.to_string()))?;
        let output = self.handler.handle(task).await?;
        serde_json::to_value(output).map_err(|e| ExecutionError::Encode(e.to_string()))
    }
}

/// `Executor` backed by an async closure.
pub struct FnExecutor<F> {
    f: F,
}

/// Wrap `f` as an `Executor`.
///
/// ```ignore
/// registry.register("echo", executor_fn(|payload| async move { Ok(payload) }))?;
/// ```
pub fn executor_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send,
{
    FnExecutor { f }
}

#[async_trait]
impl<F, Fut> Executor for FnExecutor<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send,
{
    async fn execute(&self, payload: &Value) -> Result<Value, ExecutionError> {
        (self.f)(payload.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::task::fixtures::Add;
    use serde_json::json;

    struct AddHandler;

    #[async_trait]
    impl Handler<Add> for AddHandler {
        type Output = i64;

        async fn handle(&self, task: Add) -> Result<i64, ExecutionError> {
            task.a.checked_add(task.b).ok_or_else(|| ExecutionError::failed("overflow"))
        }
    }

    #[tokio::test]
    async fn typed_executor_decodes_and_encodes() {
        let executor = TypedExecutor::<Add, _>::new(AddHandler);
        let out = executor.execute(&json!({"a": 2, "b": 40})).await.unwrap();
        assert_eq!(out, json!(42));
    }

    #[tokio::test]
    async fn typed_executor_rejects_bad_payload() {
        let executor = TypedExecutor::<Add, _>::new(AddHandler);
        let err = executor.execute(&json!({"a": "two"})).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn typed_executor_passes_handler_errors_through() {
        let executor = TypedExecutor::<Add, _>::new(AddHandler);
        let err = executor.execute(&json!({"a": i64::MAX, "b": 1})).await.unwrap_err();
        assert_eq!(err, ExecutionError::failed("overflow"));
    }

    #[tokio::test]
    async fn fn_executor_runs_closure() {
        let executor = executor_fn(|payload: Value| async move {
            let n = payload["n"].as_i64().ok_or_else(|| ExecutionError::failed("no n"))?;
            Ok(json!(n * 2))
        });
        assert_eq!(executor.execute(&json!({"n": 21})).await.unwrap(), json!(42));
        assert!(executor.execute(&json!({})).await.is_err());
    }
}
