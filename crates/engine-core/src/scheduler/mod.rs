//! Drives a run's tasks to completion, one ready-set batch at a time.
//!
//! Directly generalizes the teacher's fleet-orchestration control loop:
//! ready-set discovery, concurrency-limited batch execution, and the
//! `RUNNING -> FAILED -> RETRYING -> RUNNING` double transition so every
//! intermediate stage is observable in persistence.

use std::collections::HashMap;
use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use engine_db::models::{Task, TaskStatus};
use engine_db::queries::tasks as db;

use crate::agent::{Agent, RunContext};
use crate::llm::LlmGateway;
use crate::retry::RetryPolicy;
use crate::sandbox::Sandbox;
use crate::state::TaskStateMachine;
use crate::state::dispatch;

/// Tasks not yet resolved from the scheduler's point of view. `FAILED` is
/// excluded: once a task exhausts its retries it stays `FAILED` but is no
/// longer something the scheduler is waiting on.
fn is_unresolved(status: TaskStatus) -> bool {
    !matches!(status, TaskStatus::Done | TaskStatus::Cancelled | TaskStatus::Failed)
}

/// Errors that abort a run's scheduling pass outright.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("dependency deadlock: run {0} has no executable tasks but non-terminal tasks remain")]
    Deadlock(Uuid),

    #[error("missing dependencies: task {task_id} depends on unknown task(s) {missing:?}")]
    MissingDependencies { task_id: Uuid, missing: Vec<Uuid> },

    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

/// The outcome of driving a run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerOutcome {
    /// Every task finished in `DONE`.
    Completed,
    /// At least one task ended in `FAILED` (after exhausting its retries,
    /// or cascaded from a failed dependency).
    Failed { failed_task_ids: Vec<Uuid> },
}

/// Default batch size: sequential execution.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 1;

pub struct TaskScheduler;

impl TaskScheduler {
    /// Drive `run_id`'s tasks to completion or deadlock-failure.
    ///
    /// `concurrency_limit` must be `>= 1`; batches of that size run
    /// concurrently. Errors in one batch member do not abort its siblings.
    pub async fn execute(
        pool: &PgPool,
        run_id: Uuid,
        agent: &dyn Agent,
        ctx: &RunContext,
        gateway: &LlmGateway,
        sandbox: &dyn Sandbox,
        retry_policy: &RetryPolicy,
        concurrency_limit: usize,
    ) -> Result<SchedulerOutcome, SchedulerError> {
        let concurrency_limit = concurrency_limit.max(1);

        loop {
            Self::cascade_failures(pool, run_id).await?;

            // Cascades may have flipped PENDING tasks straight to FAILED;
            // re-read before judging whether the run is resolved.
            let tasks = db::list_tasks_for_run(pool, run_id).await?;

            if !tasks.iter().any(|t| is_unresolved(t.status)) {
                let failed_task_ids: Vec<Uuid> = tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Failed)
                    .map(|t| t.id)
                    .collect();
                return Ok(if failed_task_ids.is_empty() {
                    SchedulerOutcome::Completed
                } else {
                    SchedulerOutcome::Failed { failed_task_ids }
                });
            }

            let ready_candidates = db::get_ready_tasks(pool, run_id).await?;
            if ready_candidates.is_empty() {
                return Err(SchedulerError::Deadlock(run_id));
            }

            for candidate in ready_candidates.iter().filter(|t| t.status == TaskStatus::Pending) {
                dispatch::ready_task(pool, candidate.id).await?;
            }

            let batch: Vec<Uuid> = ready_candidates
                .iter()
                .map(|t| t.id)
                .take(concurrency_limit)
                .collect();

            let results = futures::future::join_all(batch.iter().map(|task_id| {
                Self::execute_single_inner(pool, *task_id, run_id, agent, ctx, gateway, sandbox, retry_policy)
            }))
            .await;

            for result in results {
                result?;
            }
        }
    }

    /// Run one task (ready or retrying) through to `DONE` or an exhausted
    /// `FAILED`, including any inline retries its own failures trigger.
    /// Reused by [`TaskScheduler::execute`]'s batches and by an external
    /// caller replaying a single task after recovery.
    pub async fn execute_single(
        pool: &PgPool,
        task_id: Uuid,
        run_id: Uuid,
        agent: &dyn Agent,
        ctx: &RunContext,
        gateway: &LlmGateway,
        sandbox: &dyn Sandbox,
        retry_policy: &RetryPolicy,
    ) -> Result<(), SchedulerError> {
        Self::execute_single_inner(pool, task_id, run_id, agent, ctx, gateway, sandbox, retry_policy).await
    }

    async fn execute_single_inner(
        pool: &PgPool,
        task_id: Uuid,
        _run_id: Uuid,
        agent: &dyn Agent,
        ctx: &RunContext,
        gateway: &LlmGateway,
        sandbox: &dyn Sandbox,
        retry_policy: &RetryPolicy,
    ) -> Result<(), SchedulerError> {
        loop {
            let task = db::get_task(pool, task_id)
                .await?
                .ok_or_else(|| SchedulerError::Db(anyhow::anyhow!("task {task_id} not found")))?;

            match task.status {
                TaskStatus::Ready => dispatch::start_task(pool, task_id).await?,
                TaskStatus::Retrying => dispatch::resume_task(pool, task_id).await?,
                TaskStatus::Running => {}
                other => {
                    return Err(SchedulerError::Db(anyhow::anyhow!(
                        "executeSingle called with task {task_id} in unexpected status {other}"
                    )));
                }
            }

            let running = db::get_task(pool, task_id)
                .await?
                .ok_or_else(|| SchedulerError::Db(anyhow::anyhow!("task {task_id} not found")))?;

            let outcome = agent.execute_task(&running, ctx, gateway, sandbox).await;

            match outcome {
                Ok(result) => {
                    db::complete_task(pool, task_id, &result.content, result.metadata).await?;
                    return Ok(());
                }
                Err(err) => {
                    let current = db::get_task(pool, task_id)
                        .await?
                        .ok_or_else(|| SchedulerError::Db(anyhow::anyhow!("task {task_id} not found")))?;
                    let message = err.to_string();

                    if TaskStateMachine::can_retry(TaskStatus::Failed, current.retry_count, current.max_retries) {
                        dispatch::fail_task(pool, task_id, &message, None).await?;
                        dispatch::retry_task(pool, task_id).await?;

                        let retried = db::get_task(pool, task_id)
                            .await?
                            .ok_or_else(|| SchedulerError::Db(anyhow::anyhow!("task {task_id} not found")))?;
                        let delay = retry_policy.backoff_for_attempt(retried.retry_count as u32);
                        if delay > Duration::ZERO {
                            tokio::time::sleep(delay).await;
                        }
                        continue;
                    }

                    dispatch::fail_task(pool, task_id, &message, None).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Scan for `PENDING` tasks whose dependencies are unresolvable or
    /// already `FAILED`, and cascade accordingly.
    ///
    /// Runs to a fixed point rather than a single pass: failing a task is
    /// itself a status change that can make its own dependents eligible to
    /// cascade, so a chain of `N` dependents needs up to `N` passes to fully
    /// resolve in one call (otherwise the scheduler's ready-set check could
    /// see a pending task whose failed ancestor hasn't propagated to it yet
    /// and misreport a deadlock).
    async fn cascade_failures(pool: &PgPool, run_id: Uuid) -> Result<(), SchedulerError> {
        loop {
            let tasks = db::list_tasks_for_run(pool, run_id).await?;
            let by_id: HashMap<Uuid, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
            let mut cascaded = false;

            for task in tasks.iter().filter(|t| t.status == TaskStatus::Pending) {
                let dep_ids = db::get_task_dependencies(pool, task.id).await?;

                let missing: Vec<Uuid> = dep_ids
                    .iter()
                    .copied()
                    .filter(|d| !by_id.contains_key(d))
                    .collect();
                if !missing.is_empty() {
                    return Err(SchedulerError::MissingDependencies {
                        task_id: task.id,
                        missing,
                    });
                }

                let failed_dep = dep_ids
                    .iter()
                    .copied()
                    .find(|d| by_id.get(d).map(|t| t.status == TaskStatus::Failed).unwrap_or(false));
                if let Some(failed_dep) = failed_dep {
                    let message = format!("Dependency task {failed_dep} failed");
                    db::transition_task_status(
                        pool,
                        task.id,
                        TaskStatus::Pending,
                        TaskStatus::Failed,
                        None,
                        None,
                        Some(&message),
                        Some("dependency_failed"),
                    )
                    .await?;
                    cascaded = true;
                }
            }

            if !cascaded {
                return Ok(());
            }
        }
    }
}
