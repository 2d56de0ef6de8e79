//! Database query functions for the `runs` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{AgentType, Run, RunStatus};

/// Insert a new run row. Returns the inserted run with server-generated
/// defaults (id, created_at, updated_at, status = `created`).
pub async fn insert_run(
    pool: &PgPool,
    session_id: &str,
    agent_type: AgentType,
    prompt: &str,
    provider_id: Option<&str>,
    model_id: Option<&str>,
) -> Result<Run> {
    let run = sqlx::query_as::<_, Run>(
        "INSERT INTO runs (session_id, agent_type, prompt, provider_id, model_id) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(session_id)
    .bind(agent_type)
    .bind(prompt)
    .bind(provider_id)
    .bind(model_id)
    .fetch_one(pool)
    .await
    .context("failed to insert run")?;

    Ok(run)
}

/// Fetch a run by its ID.
pub async fn get_run(pool: &PgPool, id: Uuid) -> Result<Option<Run>> {
    let run = sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch run")?;

    Ok(run)
}

/// List all runs for a session, newest first.
pub async fn list_runs_for_session(pool: &PgPool, session_id: &str) -> Result<Vec<Run>> {
    let runs = sqlx::query_as::<_, Run>(
        "SELECT * FROM runs WHERE session_id = $1 ORDER BY created_at DESC",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
    .context("failed to list runs for session")?;

    Ok(runs)
}

/// Atomically transition a run from one status to another.
///
/// Optimistic locking: the `UPDATE`'s `WHERE` clause includes `status = $from`,
/// so the row only changes if the current status still matches. Returns the
/// number of rows affected (0 means the precondition did not hold).
#[allow(clippy::too_many_arguments)]
pub async fn transition_run_status(
    pool: &PgPool,
    run_id: Uuid,
    from: RunStatus,
    to: RunStatus,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    error: Option<&str>,
    cancellation_reason: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE runs \
         SET status = $1, \
             started_at = COALESCE($2, started_at), \
             completed_at = COALESCE($3, completed_at), \
             error = COALESCE($4, error), \
             cancellation_reason = COALESCE($5, cancellation_reason), \
             updated_at = now() \
         WHERE id = $6 AND status = $7",
    )
    .bind(to)
    .bind(started_at)
    .bind(completed_at)
    .bind(error)
    .bind(cancellation_reason)
    .bind(run_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition run status")?;

    Ok(result.rows_affected())
}

/// Force a run's status, bypassing the optimistic-lock precondition.
///
/// Used only by `RunRecovery::reconstruct_state`, which derives the target
/// status from a fresh scan of task rows rather than from an in-memory
/// expectation of the run's current status.
pub async fn force_run_status(
    pool: &PgPool,
    run_id: Uuid,
    to: RunStatus,
    error: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE runs \
         SET status = $1, error = COALESCE($2, error), updated_at = now() \
         WHERE id = $3",
    )
    .bind(to)
    .bind(error)
    .bind(run_id)
    .execute(pool)
    .await
    .context("failed to force run status")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("run {run_id} not found");
    }

    Ok(())
}

/// Set the final synthesized output on a run.
pub async fn set_run_output(pool: &PgPool, run_id: Uuid, output: &str) -> Result<()> {
    let result = sqlx::query("UPDATE runs SET output = $1, updated_at = now() WHERE id = $2")
        .bind(output)
        .bind(run_id)
        .execute(pool)
        .await
        .context("failed to set run output")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("run {run_id} not found");
    }

    Ok(())
}
