//! Shared fixtures for engine-core's integration tests: a deterministic
//! stub [`Agent`] and a stub [`AIService`] that never makes network calls.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use engine_core::agent::{Agent, RunContext, TaskResult};
use engine_core::llm::{AIService, ModelOverride, ProviderUsage, StreamChunk};
use engine_core::planner::{Plan, PlanMetadata, PlannedTask};
use engine_core::sandbox::{Sandbox, SandboxAction};
use engine_db::models::{Task, TaskType};

/// An agent whose plan is fixed at construction time and whose task
/// execution always succeeds, echoing the task's description back as its
/// result. Lets scheduler/engine tests drive real persistence without a
/// live LLM or sandbox.
pub struct StubAgent {
    plan: Plan,
    /// Task IDs (by description) that should fail every attempt, to
    /// exercise retry exhaustion and cascaded failure.
    always_fail: Vec<String>,
}

impl StubAgent {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            always_fail: Vec::new(),
        }
    }

    pub fn with_failing_descriptions(mut self, descriptions: Vec<String>) -> Self {
        self.always_fail = descriptions;
        self
    }
}

#[async_trait]
impl Agent for StubAgent {
    fn name(&self) -> &str {
        "stub"
    }

    fn capabilities(&self) -> HashSet<TaskType> {
        [TaskType::Analyze, TaskType::Edit, TaskType::Test, TaskType::Review]
            .into_iter()
            .collect()
    }

    async fn plan(&self, _ctx: &RunContext, _gateway: &engine_core::llm::LlmGateway) -> Result<Plan> {
        Ok(self.plan.clone())
    }

    async fn execute_task(
        &self,
        task: &Task,
        _ctx: &RunContext,
        _gateway: &engine_core::llm::LlmGateway,
        _sandbox: &dyn Sandbox,
    ) -> Result<TaskResult> {
        if self.always_fail.contains(&task.description) {
            anyhow::bail!("stub agent configured to fail task: {}", task.description);
        }
        Ok(TaskResult {
            content: format!("done: {}", task.description),
            metadata: None,
        })
    }

    async fn synthesize(
        &self,
        _ctx: &RunContext,
        _gateway: &engine_core::llm::LlmGateway,
        tasks: &[Task],
    ) -> Result<String> {
        Ok(format!("synthesized {} tasks", tasks.len()))
    }
}

/// Build a linear three-task plan: A -> B -> C.
pub fn linear_plan() -> Plan {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    Plan {
        tasks: vec![
            planned(a, "step a", vec![]),
            planned(b, "step b", vec![a]),
            planned(c, "step c", vec![b]),
        ],
        metadata: PlanMetadata::default(),
    }
}

/// Build a diamond plan: A -> {B, C} -> D.
pub fn diamond_plan() -> Plan {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    let d = Uuid::new_v4();
    Plan {
        tasks: vec![
            planned(a, "step a", vec![]),
            planned(b, "step b", vec![a]),
            planned(c, "step c", vec![a]),
            planned(d, "step d", vec![b, c]),
        ],
        metadata: PlanMetadata::default(),
    }
}

fn planned(id: Uuid, description: &str, depends_on: Vec<Uuid>) -> PlannedTask {
    PlannedTask {
        id,
        task_type: TaskType::Analyze,
        description: description.to_string(),
        depends_on,
        expected_output: None,
    }
}

/// An agent whose task execution and synthesis both call through the LLM
/// gateway, for exercising budget enforcement on a real (stubbed) call path
/// rather than on `BudgetManager` in isolation.
pub struct BudgetAwareAgent {
    plan: Plan,
}

impl BudgetAwareAgent {
    pub fn new(plan: Plan) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl Agent for BudgetAwareAgent {
    fn name(&self) -> &str {
        "budget-aware"
    }

    fn capabilities(&self) -> HashSet<TaskType> {
        [TaskType::Review].into_iter().collect()
    }

    async fn plan(&self, _ctx: &RunContext, _gateway: &engine_core::llm::LlmGateway) -> Result<Plan> {
        Ok(self.plan.clone())
    }

    async fn execute_task(
        &self,
        task: &Task,
        ctx: &RunContext,
        gateway: &engine_core::llm::LlmGateway,
        _sandbox: &dyn Sandbox,
    ) -> Result<TaskResult> {
        let response = gateway
            .generate_text(
                ctx.run_id,
                &ctx.session_id,
                "system",
                &task.description,
                0.3,
                &ModelOverride::default(),
            )
            .await?;
        Ok(TaskResult {
            content: response.value,
            metadata: None,
        })
    }

    async fn synthesize(
        &self,
        ctx: &RunContext,
        gateway: &engine_core::llm::LlmGateway,
        _tasks: &[Task],
    ) -> Result<String> {
        let response = gateway
            .generate_text(ctx.run_id, &ctx.session_id, "system", "synthesize final answer", 0.3, &ModelOverride::default())
            .await?;
        Ok(response.value)
    }
}

/// Build a single-task plan with no dependencies, for the budget-guard
/// scenario (one task execution call, one synthesis call).
pub fn single_review_plan() -> Plan {
    let a = Uuid::new_v4();
    Plan {
        tasks: vec![planned(a, "review the change", vec![])],
        metadata: PlanMetadata::default(),
    }
}

/// An agent that cancels its own run out from under the scheduler midway
/// through the first task, simulating an operator `cancel()` landing
/// concurrently with in-flight execution. Every subsequent task the
/// scheduler tries to start will already read back as `Cancelled`.
pub struct CancellingAgent {
    plan: Plan,
    pool: sqlx::PgPool,
}

impl CancellingAgent {
    pub fn new(plan: Plan, pool: sqlx::PgPool) -> Self {
        Self { plan, pool }
    }
}

#[async_trait]
impl Agent for CancellingAgent {
    fn name(&self) -> &str {
        "cancelling"
    }

    fn capabilities(&self) -> HashSet<TaskType> {
        [TaskType::Analyze].into_iter().collect()
    }

    async fn plan(&self, _ctx: &RunContext, _gateway: &engine_core::llm::LlmGateway) -> Result<Plan> {
        Ok(self.plan.clone())
    }

    async fn execute_task(
        &self,
        task: &Task,
        ctx: &RunContext,
        _gateway: &engine_core::llm::LlmGateway,
        _sandbox: &dyn Sandbox,
    ) -> Result<TaskResult> {
        engine_core::state::dispatch::cancel_run(
            &self.pool,
            ctx.run_id,
            engine_db::models::RunStatus::Running,
            "cancelled by operator",
        )
        .await?;
        engine_db::queries::tasks::cancel_non_terminal_tasks(&self.pool, ctx.run_id).await?;

        Ok(TaskResult {
            content: format!("done before cancel landed: {}", task.description),
            metadata: None,
        })
    }

    async fn synthesize(
        &self,
        _ctx: &RunContext,
        _gateway: &engine_core::llm::LlmGateway,
        tasks: &[Task],
    ) -> Result<String> {
        Ok(format!("synthesized {} tasks", tasks.len()))
    }
}

/// A sandbox that records every action it was asked to perform and always
/// succeeds with an empty object.
#[derive(Default)]
pub struct RecordingSandbox {
    pub calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Sandbox for RecordingSandbox {
    async fn execute(&self, action: SandboxAction) -> Result<Value> {
        self.calls.lock().unwrap().push((action.plugin, action.action));
        Ok(serde_json::json!({}))
    }

    async fn get_artifact(&self, _key: &str) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// An `AIService` stub that returns a fixed response without any network
/// I/O, for exercising the gateway's budget/pricing/recording plumbing.
pub struct StubAiService {
    pub text: String,
    pub usage: ProviderUsage,
}

impl StubAiService {
    pub fn new(text: impl Into<String>, prompt_tokens: i32, completion_tokens: i32, cost: Option<f64>) -> Self {
        Self {
            text: text.into(),
            usage: ProviderUsage {
                prompt_tokens,
                completion_tokens,
                cost,
            },
        }
    }
}

#[async_trait]
impl AIService for StubAiService {
    async fn generate_text(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _temperature: f32,
        _model_override: &ModelOverride,
    ) -> Result<(String, ProviderUsage, Option<String>)> {
        Ok((self.text.clone(), self.usage.clone(), None))
    }

    async fn generate_structured_json(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _temperature: f32,
        _model_override: &ModelOverride,
    ) -> Result<(String, ProviderUsage, Option<String>)> {
        Ok((self.text.clone(), self.usage.clone(), None))
    }

    async fn create_chat_stream(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _temperature: f32,
        _model_override: &ModelOverride,
    ) -> Result<std::pin::Pin<Box<dyn futures::Stream<Item = StreamChunk> + Send>>> {
        unimplemented!("not exercised by these tests")
    }
}
