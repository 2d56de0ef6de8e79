//! Reconstructing run state after a host restart.
//!
//! `reconstruct_state` is a pure function over a task snapshot; `resume_run`
//! resets tasks orphaned by a crash and derives the run's status from it.
//! Generalizes the teacher's end-of-loop escalated/checking/failed
//! branching into one idempotent decision table (P7).

use anyhow::{Context, Result, bail};
use sqlx::PgPool;
use uuid::Uuid;

use engine_db::models::{Run, RunStatus, Task, TaskStatus};
use engine_db::queries::{runs as runs_db, tasks as tasks_db};

pub struct RunRecovery;

impl RunRecovery {
    /// Derive a run's status from a snapshot of its tasks.
    ///
    /// - all terminal, none failed/cancelled → `COMPLETED`.
    /// - any `FAILED` → `FAILED`.
    /// - any `CANCELLED` (and none failed) → `CANCELLED`.
    /// - otherwise → `RUNNING` (still in flight).
    ///
    /// The failure count in the error message counts only the tasks that
    /// actually failed, not their dependents that were cascade-failed as a
    /// side effect (`error_code == "dependency_failed"`, set by
    /// `scheduler::cascade_failures`). A chain `A -> B -> C` where `A`
    /// exhausts its retries reports `"1 task(s) failed"`, not `"3"`.
    pub fn reconstruct_state(tasks: &[Task]) -> (RunStatus, Option<String>) {
        let failed = tasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Failed
                    && t.error_code.as_deref() != Some("dependency_failed")
            })
            .count();
        if failed > 0 {
            return (RunStatus::Failed, Some(format!("{failed} task(s) failed")));
        }

        let any_cancelled = tasks.iter().any(|t| t.status == TaskStatus::Cancelled);
        let all_terminal = tasks
            .iter()
            .all(|t| matches!(t.status, TaskStatus::Done | TaskStatus::Cancelled));

        if all_terminal && any_cancelled {
            return (RunStatus::Cancelled, None);
        }
        if all_terminal {
            return (RunStatus::Completed, None);
        }

        (RunStatus::Running, None)
    }

    /// Resume a run after a restart: reset any task left in an intermediate
    /// state (`ready`/`running`/`retrying`) back to `pending`, then
    /// reconstruct and persist the run's status.
    ///
    /// Refuses runs already in a terminal state.
    pub async fn resume_run(pool: &PgPool, run_id: Uuid) -> Result<Run> {
        let run = runs_db::get_run(pool, run_id)
            .await?
            .with_context(|| format!("run {run_id} not found"))?;

        if matches!(
            run.status,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        ) {
            bail!("cannot resume run {run_id}: already {}", run.status);
        }

        tasks_db::reset_orphaned_tasks(pool, run_id).await?;

        let tasks = tasks_db::list_tasks_for_run(pool, run_id).await?;
        let (status, error) = Self::reconstruct_state(&tasks);

        runs_db::force_run_status(pool, run_id, status, error.as_deref()).await?;

        runs_db::get_run(pool, run_id)
            .await?
            .with_context(|| format!("run {run_id} vanished during resume"))
    }

    /// The last task (insertion order) not yet in a terminal state, or
    /// `None` if every task has resolved. Matches the operation's own name
    /// and its definition verbatim: scan tasks in insertion order and
    /// return the rightmost one whose status is not `DONE`/`CANCELLED`.
    ///
    /// See the recovery entry in DESIGN.md for the tension between this
    /// literal reading and the crash-recovery walkthrough (`A=DONE,
    /// B=RUNNING, C=PENDING` resuming at `B`): implemented literally here,
    /// flagged as a spec defect rather than silently resolved the other
    /// way.
    pub async fn find_last_incomplete_task(pool: &PgPool, run_id: Uuid) -> Result<Option<Task>> {
        let tasks = tasks_db::list_tasks_for_run(pool, run_id).await?;
        Ok(tasks
            .into_iter()
            .rfind(|t| !matches!(t.status, TaskStatus::Done | TaskStatus::Cancelled)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn task(status: TaskStatus) -> Task {
        Task {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            task_type: engine_db::models::TaskType::Analyze,
            status,
            description: "do something".to_string(),
            expected_output: None,
            output_content: None,
            output_metadata: None,
            error_message: None,
            error_code: None,
            retry_count: 0,
            max_retries: 3,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn all_done_is_completed() {
        let tasks = vec![task(TaskStatus::Done), task(TaskStatus::Done)];
        let (status, error) = RunRecovery::reconstruct_state(&tasks);
        assert_eq!(status, RunStatus::Completed);
        assert!(error.is_none());
    }

    #[test]
    fn any_failed_is_failed_with_count() {
        let tasks = vec![task(TaskStatus::Done), task(TaskStatus::Failed), task(TaskStatus::Failed)];
        let (status, error) = RunRecovery::reconstruct_state(&tasks);
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(error.as_deref(), Some("2 task(s) failed"));
    }

    #[test]
    fn cascade_failed_dependents_do_not_inflate_the_failure_count() {
        let mut origin = task(TaskStatus::Failed);
        origin.error_code = None;
        let mut dependent = task(TaskStatus::Failed);
        dependent.error_code = Some("dependency_failed".to_string());
        let tasks = vec![origin, dependent];
        let (status, error) = RunRecovery::reconstruct_state(&tasks);
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(error.as_deref(), Some("1 task(s) failed"));
    }

    #[test]
    fn cancelled_with_no_failures_is_cancelled() {
        let tasks = vec![task(TaskStatus::Done), task(TaskStatus::Cancelled)];
        let (status, _) = RunRecovery::reconstruct_state(&tasks);
        assert_eq!(status, RunStatus::Cancelled);
    }

    #[test]
    fn in_flight_tasks_keep_run_running() {
        let tasks = vec![task(TaskStatus::Done), task(TaskStatus::Running)];
        let (status, _) = RunRecovery::reconstruct_state(&tasks);
        assert_eq!(status, RunStatus::Running);
    }

    #[test]
    fn reconstruct_state_is_idempotent() {
        let tasks = vec![task(TaskStatus::Done), task(TaskStatus::Failed)];
        let first = RunRecovery::reconstruct_state(&tasks);
        let second = RunRecovery::reconstruct_state(&tasks);
        assert_eq!(first, second);
    }

    // a is terminal (done); b and c are both non-terminal. The last match
    // in insertion order is c, not b -- see the doc comment on
    // `find_last_incomplete_task`.
    #[test]
    fn find_last_incomplete_prefers_last_unresolved_task() {
        let mut a = task(TaskStatus::Done);
        a.created_at = Utc::now() - chrono::Duration::seconds(3);
        let mut b = task(TaskStatus::Running);
        b.created_at = Utc::now() - chrono::Duration::seconds(2);
        let mut c = task(TaskStatus::Pending);
        c.created_at = Utc::now() - chrono::Duration::seconds(1);

        let tasks = vec![a, b.clone(), c.clone()];
        let last = tasks
            .into_iter()
            .rfind(|t| !matches!(t.status, TaskStatus::Done | TaskStatus::Cancelled));
        assert_eq!(last.unwrap().id, c.id);
    }

    #[test]
    fn find_last_incomplete_is_none_when_all_terminal() {
        let a = task(TaskStatus::Done);
        let b = task(TaskStatus::Cancelled);
        let tasks = vec![a, b];
        let last = tasks
            .into_iter()
            .rfind(|t| !matches!(t.status, TaskStatus::Done | TaskStatus::Cancelled));
        assert!(last.is_none());
    }
}
