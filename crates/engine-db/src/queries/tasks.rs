//! Database query functions for the `tasks` and `task_dependencies` tables.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Task, TaskStatus, TaskType};

/// Insert a new task row. Returns the inserted task with server-generated
/// defaults (id, created_at, updated_at, status = `pending`, retry_count = 0).
pub async fn insert_task(
    pool: &PgPool,
    run_id: Uuid,
    task_type: TaskType,
    description: &str,
    expected_output: Option<&str>,
    max_retries: i32,
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (run_id, task_type, description, expected_output, max_retries) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(run_id)
    .bind(task_type)
    .bind(description)
    .bind(expected_output)
    .bind(max_retries)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List all tasks for a given run, ordered by creation time (insertion
/// order -- used both for plan traversal and as the `findLastIncompleteTask`
/// ordering).
pub async fn list_tasks_for_run(pool: &PgPool, run_id: Uuid) -> Result<Vec<Task>> {
    let tasks =
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE run_id = $1 ORDER BY created_at ASC")
            .bind(run_id)
            .fetch_all(pool)
            .await
            .context("failed to list tasks for run")?;

    Ok(tasks)
}

/// Insert a dependency edge: `task_id` depends on `depends_on`.
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent.
pub async fn insert_task_dependency(pool: &PgPool, task_id: Uuid, depends_on: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (task_id, depends_on) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(depends_on)
    .execute(pool)
    .await
    .context("failed to insert task dependency")?;

    Ok(())
}

/// Get the IDs of all tasks that a given task depends on.
pub async fn get_task_dependencies(pool: &PgPool, task_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT depends_on FROM task_dependencies WHERE task_id = $1")
            .bind(task_id)
            .fetch_all(pool)
            .await
            .context("failed to get task dependencies")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Atomically transition a task from one status to another.
///
/// Optimistic locking via `WHERE status = $from`; returns the number of rows
/// affected (0 means the precondition did not hold, i.e. a concurrent writer
/// got there first or the task no longer exists).
#[allow(clippy::too_many_arguments)]
pub async fn transition_task_status(
    pool: &PgPool,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    error_message: Option<&str>,
    error_code: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = $1, \
             started_at = COALESCE($2, started_at), \
             completed_at = COALESCE($3, completed_at), \
             error_message = COALESCE($4, error_message), \
             error_code = COALESCE($5, error_code), \
             updated_at = now() \
         WHERE id = $6 AND status = $7",
    )
    .bind(to)
    .bind(started_at)
    .bind(completed_at)
    .bind(error_message)
    .bind(error_code)
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

/// Record a task's successful output and mark it `done`.
pub async fn complete_task(
    pool: &PgPool,
    task_id: Uuid,
    content: &str,
    metadata: Option<serde_json::Value>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'done', output_content = $1, output_metadata = $2, \
             completed_at = now(), updated_at = now() \
         WHERE id = $3 AND status = 'running'",
    )
    .bind(content)
    .bind(metadata)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to complete task")?;

    Ok(result.rows_affected())
}

/// Increment `retry_count` on a task. Used as part of the
/// `RUNNING -> FAILED -> RETRYING -> RUNNING` double transition so the
/// counter advances exactly once per retry.
pub async fn increment_retry_count(pool: &PgPool, task_id: Uuid) -> Result<i32> {
    let row: (i32,) = sqlx::query_as(
        "UPDATE tasks SET retry_count = retry_count + 1, updated_at = now() \
         WHERE id = $1 RETURNING retry_count",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
    .context("failed to increment task retry count")?;

    Ok(row.0)
}

/// Get all tasks in a run that are `ready`, plus `pending` tasks whose
/// dependencies are all `done` (the scheduler's ready-set source query).
pub async fn get_ready_tasks(pool: &PgPool, run_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE run_id = $1 AND status = 'ready' \
         UNION ALL \
         SELECT t.* FROM tasks t \
         WHERE t.run_id = $1 \
           AND t.status = 'pending' \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.depends_on \
               WHERE td.task_id = t.id AND dep.status != 'done' \
           )",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("failed to get ready tasks")?;

    Ok(tasks)
}

/// Status counts for a run's tasks.
#[derive(Debug, Clone, Default)]
pub struct RunProgress {
    pub pending: i64,
    pub ready: i64,
    pub running: i64,
    pub blocked: i64,
    pub done: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub retrying: i64,
    pub total: i64,
}

/// Get a summary of task counts by status for a given run.
pub async fn get_run_progress(pool: &PgPool, run_id: Uuid) -> Result<RunProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status::text, COUNT(*) as cnt FROM tasks WHERE run_id = $1 GROUP BY status",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("failed to get run progress")?;

    let mut progress = RunProgress::default();
    for (status, count) in &rows {
        match status.as_str() {
            "pending" => progress.pending = *count,
            "ready" => progress.ready = *count,
            "running" => progress.running = *count,
            "blocked" => progress.blocked = *count,
            "done" => progress.done = *count,
            "failed" => progress.failed = *count,
            "cancelled" => progress.cancelled = *count,
            "retrying" => progress.retrying = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}

/// Reset tasks stuck in intermediate states (`ready`, `running`, `retrying`)
/// back to `pending` so `RunRecovery` can reconstruct state and the
/// scheduler can re-discover them as the ready set.
///
/// Used for restart recovery: if the host crashes mid-run, tasks that were
/// in flight are left in limbo. Returns the tasks that were reset.
pub async fn reset_orphaned_tasks(pool: &PgPool, run_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'pending', updated_at = now() \
         WHERE run_id = $1 AND status IN ('ready', 'running', 'retrying') \
         RETURNING *",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("failed to reset orphaned tasks")?;

    Ok(tasks)
}

/// Reset every `FAILED` task for a run back to `PENDING` for an
/// operator-initiated run retry, clearing its retry count and error so it
/// gets a fresh set of attempts. Returns the reset tasks.
pub async fn reset_failed_tasks(pool: &PgPool, run_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'pending', retry_count = 0, error_message = NULL, error_code = NULL, \
             completed_at = NULL, updated_at = now() \
         WHERE run_id = $1 AND status = 'failed' \
         RETURNING *",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("failed to reset failed tasks")?;

    Ok(tasks)
}

/// Cascade-cancel every task for a run that is not already terminal.
/// Returns the number of tasks cancelled.
pub async fn cancel_non_terminal_tasks(pool: &PgPool, run_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'cancelled', completed_at = now(), updated_at = now() \
         WHERE run_id = $1 AND status NOT IN ('done', 'cancelled')",
    )
    .bind(run_id)
    .execute(pool)
    .await
    .context("failed to cancel non-terminal tasks")?;

    Ok(result.rows_affected())
}
