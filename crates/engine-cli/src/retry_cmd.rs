//! `engine retry`: operator-initiated retry of a failed run.

use anyhow::{Context, Result};
use uuid::Uuid;

use engine_core::engine::RunEngine;

pub async fn run_retry(engine: &RunEngine, run_id: &str) -> Result<()> {
    let id = Uuid::parse_str(run_id).with_context(|| format!("invalid run ID: {run_id}"))?;
    let outcome = engine.retry(id).await.context("retry failed")?;

    println!("Run {} retried, finished as {}", outcome.run_id, outcome.status);
    if let Some(output) = outcome.output {
        println!();
        println!("{output}");
    }
    Ok(())
}
