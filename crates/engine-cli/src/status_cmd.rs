//! `engine status`: show a single run's progress, or list runs for a session.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use engine_db::queries::{runs as runs_db, tasks as tasks_db};

pub async fn run_status(pool: &PgPool, run_id: Option<&str>, session_id: Option<&str>) -> Result<()> {
    if let Some(run_id) = run_id {
        let id = Uuid::parse_str(run_id).with_context(|| format!("invalid run ID: {run_id}"))?;
        let run = runs_db::get_run(pool, id)
            .await?
            .with_context(|| format!("run {id} not found"))?;
        let progress = tasks_db::get_run_progress(pool, id).await?;

        println!("Run {}", run.id);
        println!("  session:  {}", run.session_id);
        println!("  agent:    {}", run.agent_type);
        println!("  status:   {}", run.status);
        if let Some(err) = &run.error {
            println!("  error:    {err}");
        }
        println!(
            "  tasks:    {} total ({} done, {} failed, {} in flight)",
            progress.total,
            progress.done,
            progress.failed,
            progress.pending + progress.ready + progress.running + progress.retrying + progress.blocked,
        );
        return Ok(());
    }

    let session_id = session_id.context("either a run ID or --session is required")?;
    let runs = runs_db::list_runs_for_session(pool, session_id).await?;
    if runs.is_empty() {
        println!("No runs for session {session_id}.");
        return Ok(());
    }
    for run in runs {
        println!("{}  {:<10}  {}", run.id, run.status, run.prompt);
    }
    Ok(())
}
