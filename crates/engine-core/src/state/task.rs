//! Task state machine transitions.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use engine_db::models::TaskStatus;
use engine_db::queries::tasks as db;

/// The task state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// pending   -> ready     | cancelled
/// ready     -> running   | blocked   | cancelled
/// running   -> done      | failed    | cancelled
/// failed    -> retrying  | cancelled
/// blocked   -> ready     | cancelled
/// retrying  -> running
/// done / cancelled -> (none)
/// ```
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge in the
    /// state graph.
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        matches!(
            (from, to),
            (TaskStatus::Pending, TaskStatus::Ready)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Ready, TaskStatus::Running)
                | (TaskStatus::Ready, TaskStatus::Blocked)
                | (TaskStatus::Ready, TaskStatus::Cancelled)
                | (TaskStatus::Running, TaskStatus::Done)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Cancelled)
                | (TaskStatus::Failed, TaskStatus::Retrying)
                | (TaskStatus::Failed, TaskStatus::Cancelled)
                | (TaskStatus::Blocked, TaskStatus::Ready)
                | (TaskStatus::Blocked, TaskStatus::Cancelled)
                | (TaskStatus::Retrying, TaskStatus::Running)
        )
    }

    /// `canRetry = status == FAILED && retry_count < max_retries`.
    pub fn can_retry(status: TaskStatus, retry_count: i32, max_retries: i32) -> bool {
        status == TaskStatus::Failed && retry_count < max_retries
    }

    /// Execute a state transition with optimistic locking.
    ///
    /// - Stamps `started_at` on entry to `running`.
    /// - Stamps `completed_at` on entry to any terminal state
    ///   (`done`/`cancelled`).
    /// - A transition into `failed` stamps `error_message`/`error_code`.
    /// - A transition into `retrying` increments `retry_count` (the one
    ///   point at which the counter advances -- the surrounding
    ///   `running -> failed -> retrying -> running` double transition is
    ///   driven by the scheduler, not by this function, so observers see
    ///   every intermediate stage).
    pub async fn transition(
        pool: &PgPool,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        error_message: Option<&str>,
        error_code: Option<&str>,
    ) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            bail!(
                "invalid state transition: {} -> {} for task {}",
                from,
                to,
                task_id
            );
        }

        if to == TaskStatus::Retrying {
            return Self::retry_transition(pool, task_id, from).await;
        }

        let started_at = (to == TaskStatus::Running).then(Utc::now);
        let completed_at = to.is_terminal().then(Utc::now);

        let rows = db::transition_task_status(
            pool,
            task_id,
            from,
            to,
            started_at,
            completed_at,
            error_message,
            error_code,
        )
        .await
        .with_context(|| format!("failed to transition task {task_id} from {from} to {to}"))?;

        if rows == 0 {
            let task = db::get_task(pool, task_id).await?;
            match task {
                None => bail!("task {task_id} not found"),
                Some(t) => bail!(
                    "optimistic lock failed: task {task_id} has status {}, expected {from}",
                    t.status
                ),
            }
        }

        Ok(())
    }

    /// Handle the `failed -> retrying` transition: checks the retry budget,
    /// then atomically flips the status and increments `retry_count`.
    async fn retry_transition(pool: &PgPool, task_id: Uuid, from: TaskStatus) -> Result<()> {
        let task = db::get_task(pool, task_id)
            .await?
            .with_context(|| format!("task {task_id} not found"))?;

        if task.status != from {
            bail!(
                "cannot retry task {task_id}: current status is {}, expected {from}",
                task.status
            );
        }

        if !Self::can_retry(task.status, task.retry_count, task.max_retries) {
            bail!(
                "cannot retry task {task_id}: retry_count {} >= max_retries {}",
                task.retry_count,
                task.max_retries
            );
        }

        let rows = db::transition_task_status(
            pool,
            task_id,
            from,
            TaskStatus::Retrying,
            None,
            None,
            None,
            None,
        )
        .await?;

        if rows == 0 {
            bail!("optimistic lock failed on retry for task {task_id}");
        }

        db::increment_retry_count(pool, task_id).await?;

        Ok(())
    }

    /// Validate that all dependencies of a task are `done`.
    pub async fn check_dependencies(pool: &PgPool, task_id: Uuid) -> Result<bool> {
        let dep_ids = db::get_task_dependencies(pool, task_id).await?;

        for dep_id in dep_ids {
            let dep = db::get_task(pool, dep_id)
                .await?
                .with_context(|| format!("dependency task {dep_id} not found"))?;

            if dep.status != TaskStatus::Done {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_lifecycle_is_valid() {
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Pending,
            TaskStatus::Ready
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Ready,
            TaskStatus::Running
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Running,
            TaskStatus::Done
        ));
    }

    #[test]
    fn retry_cycle_is_valid() {
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Running,
            TaskStatus::Failed
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Failed,
            TaskStatus::Retrying
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Retrying,
            TaskStatus::Running
        ));
    }

    #[test]
    fn blocked_returns_to_ready() {
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Ready,
            TaskStatus::Blocked
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Blocked,
            TaskStatus::Ready
        ));
    }

    #[test]
    fn terminal_states_are_dead_ends() {
        for to in [TaskStatus::Ready, TaskStatus::Running, TaskStatus::Done] {
            assert!(!TaskStateMachine::is_valid_transition(TaskStatus::Done, to));
            assert!(!TaskStateMachine::is_valid_transition(
                TaskStatus::Cancelled,
                to
            ));
        }
    }

    #[test]
    fn skipping_ready_is_invalid() {
        assert!(!TaskStateMachine::is_valid_transition(
            TaskStatus::Pending,
            TaskStatus::Running
        ));
    }

    #[test]
    fn can_retry_respects_budget() {
        assert!(TaskStateMachine::can_retry(TaskStatus::Failed, 0, 3));
        assert!(TaskStateMachine::can_retry(TaskStatus::Failed, 2, 3));
        assert!(!TaskStateMachine::can_retry(TaskStatus::Failed, 3, 3));
        assert!(!TaskStateMachine::can_retry(TaskStatus::Done, 0, 3));
    }
}
