//! `engine cancel`: cooperative, idempotent cancellation of a run.

use anyhow::{Context, Result};
use uuid::Uuid;

use engine_core::engine::RunEngine;

pub async fn run_cancel(engine: &RunEngine, run_id: &str) -> Result<()> {
    let id = Uuid::parse_str(run_id).with_context(|| format!("invalid run ID: {run_id}"))?;
    engine.cancel(id).await.context("cancel failed")?;
    println!("Run {id} cancelled.");
    Ok(())
}
