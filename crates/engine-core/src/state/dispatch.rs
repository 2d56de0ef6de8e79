//! Convenience dispatch helpers that wrap the run/task state machines with
//! semantic names.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use engine_db::models::{RunStatus, TaskStatus};

use super::{RunStateMachine, TaskStateMachine};

// ---------------------------------------------------------------------------
// Run transitions
// ---------------------------------------------------------------------------

/// Start planning for a newly-created run: `created -> planning`.
pub async fn start_planning(pool: &PgPool, run_id: Uuid) -> Result<()> {
    RunStateMachine::transition(
        pool,
        run_id,
        RunStatus::Created,
        RunStatus::Planning,
        None,
        None,
    )
    .await
}

/// Begin execution after a plan is accepted: `planning -> running`.
pub async fn start_running(pool: &PgPool, run_id: Uuid) -> Result<()> {
    RunStateMachine::transition(
        pool,
        run_id,
        RunStatus::Planning,
        RunStatus::Running,
        None,
        None,
    )
    .await
}

/// Complete a run: `running -> completed`.
pub async fn complete_run(pool: &PgPool, run_id: Uuid) -> Result<()> {
    RunStateMachine::transition(
        pool,
        run_id,
        RunStatus::Running,
        RunStatus::Completed,
        None,
        None,
    )
    .await
}

/// Fail a run from any of the states that allow it, stamping `error`.
pub async fn fail_run(pool: &PgPool, run_id: Uuid, from: RunStatus, error: &str) -> Result<()> {
    RunStateMachine::transition(pool, run_id, from, RunStatus::Failed, Some(error), None).await
}

/// Cancel a run from any of the states that allow it.
pub async fn cancel_run(pool: &PgPool, run_id: Uuid, from: RunStatus, reason: &str) -> Result<()> {
    RunStateMachine::transition(
        pool,
        run_id,
        from,
        RunStatus::Cancelled,
        None,
        Some(reason),
    )
    .await
}

/// Operator-initiated retry of a failed run: `failed -> running`.
pub async fn retry_run(pool: &PgPool, run_id: Uuid) -> Result<()> {
    RunStateMachine::transition(
        pool,
        run_id,
        RunStatus::Failed,
        RunStatus::Running,
        None,
        None,
    )
    .await
}

/// Operator-initiated restart of a cancelled run: `cancelled -> created`.
pub async fn restart_run(pool: &PgPool, run_id: Uuid) -> Result<()> {
    RunStateMachine::transition(
        pool,
        run_id,
        RunStatus::Cancelled,
        RunStatus::Created,
        None,
        None,
    )
    .await
}

// ---------------------------------------------------------------------------
// Task transitions
// ---------------------------------------------------------------------------

/// Mark a task ready to run: `pending -> ready`.
pub async fn ready_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Pending, TaskStatus::Ready, None, None)
        .await
}

/// Start a task: `ready -> running`.
pub async fn start_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Ready, TaskStatus::Running, None, None)
        .await
}

/// Resume a retried task: `retrying -> running`.
pub async fn resume_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(
        pool,
        task_id,
        TaskStatus::Retrying,
        TaskStatus::Running,
        None,
        None,
    )
    .await
}

/// Block a ready task pending an external condition: `ready -> blocked`.
pub async fn block_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Ready, TaskStatus::Blocked, None, None)
        .await
}

/// Unblock a task: `blocked -> ready`.
pub async fn unblock_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Blocked, TaskStatus::Ready, None, None)
        .await
}

/// Fail a running task, stamping `error_message`/`error_code`.
pub async fn fail_task(
    pool: &PgPool,
    task_id: Uuid,
    error_message: &str,
    error_code: Option<&str>,
) -> Result<()> {
    TaskStateMachine::transition(
        pool,
        task_id,
        TaskStatus::Running,
        TaskStatus::Failed,
        Some(error_message),
        error_code,
    )
    .await
}

/// Begin a retry: `failed -> retrying`. Increments `retry_count` and fails
/// if the retry budget is already exhausted.
pub async fn retry_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(
        pool,
        task_id,
        TaskStatus::Failed,
        TaskStatus::Retrying,
        None,
        None,
    )
    .await
}

/// Cancel a task from any of the states that allow it.
pub async fn cancel_task(pool: &PgPool, task_id: Uuid, from: TaskStatus) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, from, TaskStatus::Cancelled, None, None).await
}
