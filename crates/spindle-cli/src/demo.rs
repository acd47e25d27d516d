//! Demo executors and the workload the binary submits.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use spindle_core::{AppBuilder, ExecutionError, Handler, RegistryError, TaskKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEmail {
    pub email: String,
    #[serde(default)]
    pub subject: String,
}

impl TaskKind for SendEmail {
    const TYPE: &'static str = "email";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessData {
    #[serde(default = "default_count")]
    pub count: u64,
}

fn default_count() -> u64 {
    100
}

impl TaskKind for ProcessData {
    const TYPE: &'static str = "data_processing";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateReport {
    pub name: String,
}

impl TaskKind for GenerateReport {
    const TYPE: &'static str = "report_generation";
}

struct EmailHandler;

#[async_trait]
impl Handler<SendEmail> for EmailHandler {
    type Output = Value;

    async fn handle(&self, task: SendEmail) -> Result<Value, ExecutionError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(json!({ "status": "email_sent", "to": task.email }))
    }
}

struct DataHandler;

#[async_trait]
impl Handler<ProcessData> for DataHandler {
    type Output = Value;

    async fn handle(&self, task: ProcessData) -> Result<Value, ExecutionError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(json!({ "status": "processed", "records": task.count }))
    }
}

struct ReportHandler;

#[async_trait]
impl Handler<GenerateReport> for ReportHandler {
    type Output = Value;

    async fn handle(&self, task: GenerateReport) -> Result<Value, ExecutionError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(json!({ "status": "generated", "report_id": format!("RPT-{}", task.name) }))
    }
}

/// Register the demo executors, including `flaky`, which fails its first
/// `failures` calls.
pub fn register(builder: AppBuilder, failures: u32) -> Result<AppBuilder, RegistryError> {
    let remaining = Arc::new(AtomicU32::new(failures));

    builder
        .register_typed::<SendEmail, _>(EmailHandler)?
        .register_typed::<ProcessData, _>(DataHandler)?
        .register_typed::<GenerateReport, _>(ReportHandler)?
        .register_fn("flaky", move |payload| {
            let remaining = Arc::clone(&remaining);
            async move {
                match remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
                    Ok(left) => Err(ExecutionError::failed(format!("intentional failure (left={left})"))),
                    Err(_) => Ok(json!({ "status": "completed", "data": payload })),
                }
            }
        })
}

/// Task types the demo expects to be served.
pub const EXPECTED: &[&str] = &[SendEmail::TYPE, ProcessData::TYPE, GenerateReport::TYPE, "flaky"];

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_core::{Executor, TaskType};
    use tokio::task::JoinSet;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn flaky_fails_exactly_its_budget_under_concurrency() {
        let app = register(AppBuilder::new(), 2).unwrap().build().await.unwrap();
        let flaky = app.registry().resolve(&TaskType::new("flaky")).unwrap();

        let mut calls = JoinSet::new();
        for n in 0..16 {
            let flaky = Arc::clone(&flaky);
            calls.spawn(async move { flaky.execute(&json!({ "n": n })).await });
        }

        let mut failed = 0;
        while let Some(res) = calls.join_next().await {
            if res.unwrap().is_err() {
                failed += 1;
            }
        }
        assert_eq!(failed, 2);
    }

    #[tokio::test]
    async fn expected_types_are_all_registered() {
        let app = register(AppBuilder::new(), 0)
            .unwrap()
            .expect_tasks(EXPECTED)
            .build()
            .await;
        assert!(app.is_ok());
    }
}
