//! The top-level pipeline driver: plan, create tasks, schedule, synthesize,
//! persist. Generalizes the teacher's top-level control flow (restart
//! recovery -> status transition -> spawn loop -> terminal check) into
//! `getOrCreateRun -> plan -> createTasks -> schedule -> synthesize ->
//! persist`.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use engine_db::models::{AgentType, Run, RunStatus};
use engine_db::queries::{runs as runs_db, tasks as tasks_db};

use crate::agent::{AgentRegistry, RunContext, default_synthesize};
use crate::budget::BudgetManager;
use crate::cost::CostLedger;
use crate::llm::{LlmError, LlmGateway};
use crate::recovery::RunRecovery;
use crate::retry::RetryPolicy;
use crate::sandbox::Sandbox;
use crate::scheduler::{SchedulerError, SchedulerOutcome, TaskScheduler};
use crate::state::dispatch;

/// Input to a new run: mirrors the `input` object in the host transport
/// contract, minus the wire-level envelope fields (`runId`/`correlationId`)
/// the host assigns.
#[derive(Debug, Clone)]
pub struct RunEngineInput {
    pub agent_type: AgentType,
    pub session_id: String,
    pub prompt: String,
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
}

/// The result of driving a run through the pipeline (or resuming one).
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub output: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunEngineError {
    #[error("planning failed: {0}")]
    Planning(anyhow::Error),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

pub struct RunEngine {
    pool: PgPool,
    agents: AgentRegistry,
    gateway: LlmGateway,
    sandbox: Arc<dyn Sandbox>,
    budget: BudgetManager,
    retry_policy: RetryPolicy,
    concurrency_limit: usize,
}

impl RunEngine {
    pub fn new(
        pool: PgPool,
        agents: AgentRegistry,
        gateway: LlmGateway,
        sandbox: Arc<dyn Sandbox>,
        budget: BudgetManager,
        retry_policy: RetryPolicy,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            pool,
            agents,
            gateway,
            sandbox,
            budget,
            retry_policy,
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    /// Run the full pipeline for a freshly created run: plan, create tasks,
    /// schedule, synthesize, persist.
    pub async fn execute(&self, input: RunEngineInput) -> Result<RunOutcome, RunEngineError> {
        let existing_session_cost = CostLedger::aggregate_for_session(&self.pool, &input.session_id)
            .await
            .unwrap_or(0.0);
        self.budget.load_session_costs(&input.session_id, existing_session_cost).await;

        let run = runs_db::insert_run(
            &self.pool,
            &input.session_id,
            input.agent_type,
            &input.prompt,
            input.provider_id.as_deref(),
            input.model_id.as_deref(),
        )
        .await?;

        self.run_pipeline(&run, &input).await
    }

    /// Resume an interrupted run: reset orphaned tasks, reconstruct status,
    /// and if still in flight, re-enter scheduling/synthesis from there.
    pub async fn resume(&self, run_id: Uuid) -> Result<RunOutcome, RunEngineError> {
        let run = RunRecovery::resume_run(&self.pool, run_id).await?;

        if run.status != RunStatus::Running {
            return Ok(RunOutcome {
                run_id: run.id,
                status: run.status,
                output: run.output,
            });
        }

        self.schedule_and_synthesize(&run).await
    }

    /// Operator-initiated retry of a failed run: reset its `FAILED` tasks to
    /// `PENDING` with a clean retry count, flip the run `FAILED -> RUNNING`,
    /// and re-enter scheduling. Task reset is left unspecified upstream;
    /// this is the resolution: a retry gives every failed task a fresh set
    /// of attempts rather than replaying its exhausted one.
    pub async fn retry(&self, run_id: Uuid) -> Result<RunOutcome, RunEngineError> {
        let run = runs_db::get_run(&self.pool, run_id)
            .await?
            .ok_or_else(|| RunEngineError::Db(anyhow::anyhow!("run {run_id} not found")))?;

        if run.status != RunStatus::Failed {
            return Err(RunEngineError::Db(anyhow::anyhow!(
                "cannot retry run {run_id}: not in failed state (currently {})",
                run.status
            )));
        }

        tasks_db::reset_failed_tasks(&self.pool, run_id).await?;
        dispatch::retry_run(&self.pool, run_id).await?;

        let run = runs_db::get_run(&self.pool, run_id)
            .await?
            .ok_or_else(|| RunEngineError::Db(anyhow::anyhow!("run {run_id} vanished during retry")))?;

        self.schedule_and_synthesize(&run).await
    }

    /// Idempotent cancellation: a terminal run is left untouched; otherwise
    /// the run and every non-terminal task cascade to `CANCELLED`.
    pub async fn cancel(&self, run_id: Uuid) -> Result<(), RunEngineError> {
        let run = runs_db::get_run(&self.pool, run_id)
            .await?
            .ok_or_else(|| RunEngineError::Db(anyhow::anyhow!("run {run_id} not found")))?;

        if run.status.is_terminal() {
            return Ok(());
        }

        dispatch::cancel_run(&self.pool, run_id, run.status, "cancelled by operator").await?;
        tasks_db::cancel_non_terminal_tasks(&self.pool, run_id).await?;

        Ok(())
    }

    async fn run_pipeline(&self, run: &Run, input: &RunEngineInput) -> Result<RunOutcome, RunEngineError> {
        let ctx = RunContext {
            run_id: run.id,
            session_id: input.session_id.clone(),
            prompt: input.prompt.clone(),
        };

        let agent = self.agents.get(input.agent_type)?;

        dispatch::start_planning(&self.pool, run.id).await?;

        let plan = match agent.plan(&ctx, &self.gateway).await {
            Ok(plan) => plan,
            Err(e) => {
                dispatch::fail_run(&self.pool, run.id, RunStatus::Planning, &e.to_string()).await.ok();
                return Err(RunEngineError::Planning(e));
            }
        };

        let mut id_map: HashMap<Uuid, Uuid> = HashMap::with_capacity(plan.tasks.len());
        for planned in &plan.tasks {
            let inserted = tasks_db::insert_task(
                &self.pool,
                run.id,
                planned.task_type,
                &planned.description,
                planned.expected_output.as_deref(),
                self.retry_policy.max_retries as i32,
            )
            .await?;
            id_map.insert(planned.id, inserted.id);
        }
        for planned in &plan.tasks {
            let task_id = id_map[&planned.id];
            for dep in &planned.depends_on {
                tasks_db::insert_task_dependency(&self.pool, task_id, id_map[dep]).await?;
            }
        }

        dispatch::start_running(&self.pool, run.id).await?;

        let run = runs_db::get_run(&self.pool, run.id)
            .await?
            .ok_or_else(|| RunEngineError::Db(anyhow::anyhow!("run {} vanished mid-pipeline", run.id)))?;

        self.schedule_and_synthesize(&run).await
    }

    /// Shared tail of `execute`/`resume`: drive the scheduler, reconcile the
    /// run's status against the resulting task snapshot, synthesize, and
    /// persist.
    async fn schedule_and_synthesize(&self, run: &Run) -> Result<RunOutcome, RunEngineError> {
        let ctx = RunContext {
            run_id: run.id,
            session_id: run.session_id.clone(),
            prompt: run.prompt.clone(),
        };
        let agent = self.agents.get(run.agent_type)?;

        let schedule_result = TaskScheduler::execute(
            &self.pool,
            run.id,
            agent,
            &ctx,
            &self.gateway,
            self.sandbox.as_ref(),
            &self.retry_policy,
            self.concurrency_limit,
        )
        .await;

        if let Err(e) = schedule_result {
            runs_db::force_run_status(&self.pool, run.id, RunStatus::Failed, Some(&e.to_string())).await.ok();
            return Err(RunEngineError::Scheduler(e));
        }

        let tasks = tasks_db::list_tasks_for_run(&self.pool, run.id).await?;
        let (derived_status, derived_error) = RunRecovery::reconstruct_state(&tasks);

        if derived_status == RunStatus::Failed {
            dispatch::fail_run(
                &self.pool,
                run.id,
                RunStatus::Running,
                derived_error.as_deref().unwrap_or("run failed"),
            )
            .await?;
            return Ok(RunOutcome {
                run_id: run.id,
                status: RunStatus::Failed,
                output: None,
            });
        }

        if derived_status == RunStatus::Cancelled {
            // A concurrent operator cancel() landed while this pass was
            // scheduling: every non-terminal task is already CANCELLED, so
            // the run follows rather than getting synthesized to COMPLETED.
            dispatch::cancel_run(&self.pool, run.id, RunStatus::Running, "cancelled by operator").await?;
            return Ok(RunOutcome {
                run_id: run.id,
                status: RunStatus::Cancelled,
                output: None,
            });
        }

        let output = match agent.synthesize(&ctx, &self.gateway, &tasks).await {
            Ok(text) => text,
            Err(e) if is_budget_exceeded(&e) => {
                let summary = default_synthesize(&tasks)?;
                format!("Budget limit reached.\n{summary}")
            }
            Err(e) => {
                runs_db::force_run_status(&self.pool, run.id, RunStatus::Failed, Some(&e.to_string())).await.ok();
                return Err(RunEngineError::Db(e));
            }
        };

        runs_db::set_run_output(&self.pool, run.id, &output).await?;
        dispatch::complete_run(&self.pool, run.id).await?;

        Ok(RunOutcome {
            run_id: run.id,
            status: RunStatus::Completed,
            output: Some(output),
        })
    }
}

fn is_budget_exceeded(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<LlmError>(),
        Some(LlmError::BudgetExceeded { .. }) | Some(LlmError::SessionBudgetExceeded { .. })
    )
}
