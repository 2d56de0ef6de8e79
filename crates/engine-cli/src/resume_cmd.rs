//! `engine resume`: re-enter scheduling for a run interrupted by a crash.

use anyhow::{Context, Result};
use uuid::Uuid;

use engine_core::engine::RunEngine;

pub async fn run_resume(engine: &RunEngine, run_id: &str) -> Result<()> {
    let id = Uuid::parse_str(run_id).with_context(|| format!("invalid run ID: {run_id}"))?;
    let outcome = engine.resume(id).await.context("resume failed")?;

    println!("Run {} resumed, finished as {}", outcome.run_id, outcome.status);
    if let Some(output) = outcome.output {
        println!();
        println!("{output}");
    }
    Ok(())
}
