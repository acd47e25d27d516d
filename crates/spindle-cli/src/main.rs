//! spindle demo process.
//!
//! Builds the engine from settings, submits a small mixed workload (including
//! a task type nobody serves), waits for every task to finish and prints the
//! final statistics as JSON.

mod demo;
mod settings;
mod telemetry;

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use spindle_core::{AppBuilder, TaskId, TaskService};

use crate::demo::{GenerateReport, ProcessData, SendEmail};

const POLL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init(telemetry::LogFormat::from_env());

    let config = settings::load()?;
    tracing::info!(
        pool_size = config.pool_size,
        max_retries = config.max_retries,
        retry_delay_ms = config.retry_delay_ms,
        store = ?config.store,
        "starting"
    );

    let app = demo::register(AppBuilder::new().with_config(config), 2)?
        .expect_tasks(demo::EXPECTED)
        .build()
        .await
        .context("building engine")?;
    let running = app.start();
    let service = running.service();

    let ids = submit_workload(&service).await?;

    tokio::select! {
        res = wait_all(&service, &ids) => res?,
        _ = tokio::signal::ctrl_c() => tracing::warn!("interrupted; shutting down"),
    }

    for id in &ids {
        let outcome = service.get_result(*id).await?;
        println!("{id}: {}", serde_json::to_string(&outcome)?);
    }
    let stats = service.get_stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    running.shutdown_and_join().await;
    Ok(())
}

async fn submit_workload(service: &TaskService) -> Result<Vec<TaskId>> {
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            service
                .submit(&SendEmail {
                    email: format!("user{i}@example.com"),
                    subject: "hello".into(),
                })
                .await?,
        );
    }
    ids.push(service.submit(&ProcessData { count: 250 }).await?);
    ids.push(service.submit(&GenerateReport { name: "weekly".into() }).await?);
    ids.push(service.submit_task("flaky", json!({ "n": 1 })).await?);
    ids.push(service.submit_task("ghost", json!({})).await?);
    tracing::info!(submitted = ids.len(), "workload submitted");
    Ok(ids)
}

async fn wait_all(service: &TaskService, ids: &[TaskId]) -> Result<()> {
    loop {
        let mut pending = 0;
        for id in ids {
            if !service.get_task(*id).await?.state.is_terminal() {
                pending += 1;
            }
        }
        if pending == 0 {
            return Ok(());
        }
        tracing::debug!(pending, "waiting");
        tokio::time::sleep(POLL).await;
    }
}
