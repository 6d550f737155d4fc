//! Smoke-test harness: loads a pool document and runs a handful of
//! scripted submissions against it, printing per-executor stats.
//!
//! Usage:
//!   admission_cli <path-to-pool.yaml>

use admission_core::{PoolConfig, TaskContext, Value};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let path = env::args().nth(1).context("usage: admission_cli <pool.yaml>")?;
    let source = fs::read_to_string(&path)
        .with_context(|| format!("reading pool document at {path}"))?;

    let config = PoolConfig::from_yaml_str(&source).context("parsing pool document")?;
    info!(pool = %config.name, "loaded pool document");

    let facade = config.build()?;

    for i in 0..20 {
        let mut request = BTreeMap::new();
        request.insert(
            "customerTier".to_string(),
            Value::String(if i % 3 == 0 { "PLATINUM".into() } else { "STANDARD".into() }),
        );
        request.insert("requestId".to_string(), Value::String(format!("req-{i}")));
        request.insert("priority".to_string(), Value::Int(i));
        let ctx = TaskContext::new(request, BTreeMap::new(), None, None);

        let task_id = ctx.task_id.clone();
        let log_id = task_id.clone();
        if let Err(rejected) = facade
            .submit(
                ctx,
                Box::new(move || {
                    info!(task_id = %log_id, "task executed");
                }),
            )
            .await
        {
            error!(task_id = %task_id, %rejected, "submission rejected");
        }
    }

    let terminated = facade.await_termination(Duration::from_secs(2)).await;
    info!(terminated, "smoke run finished draining");

    Ok(())
}
