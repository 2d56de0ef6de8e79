//! The `Agent` strategy interface and its registry.
//!
//! An agent is polymorphic over a small capability set: produce a plan for a
//! prompt, execute a single task, and synthesize a final answer from a
//! completed run. Concrete variants are a closed sum (`CodingAgent`,
//! `ReviewAgent`); there is no open-ended inheritance hierarchy.

pub mod coding;
pub mod registry;
pub mod review;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use engine_db::models::{Task, TaskType};

use crate::llm::LlmGateway;
use crate::planner::Plan;
use crate::sandbox::{Sandbox, SandboxAction, validate_shell_command, validate_workspace_path};

pub use coding::CodingAgent;
pub use registry::AgentRegistry;
pub use review::ReviewAgent;

/// Context passed to an agent for planning, task execution, and synthesis.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub session_id: String,
    pub prompt: String,
}

/// The outcome of executing a single task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub content: String,
    pub metadata: Option<serde_json::Value>,
}

/// Error returned when a task's `type` is not in an agent's
/// [`Agent::capabilities`] set.
#[derive(Debug, thiserror::Error)]
#[error("agent {agent} does not support task type {task_type}")]
pub struct UnsupportedTaskType {
    pub agent: String,
    pub task_type: TaskType,
}

/// Strategy interface implemented by every concrete agent variant.
///
/// Object-safe: every method returns a concrete, owned type, so `Box<dyn
/// Agent>` can be stored in an [`AgentRegistry`].
#[async_trait]
pub trait Agent: Send + Sync {
    /// Human-readable name (e.g. "coding", "review").
    fn name(&self) -> &str;

    /// The set of task types this agent can execute.
    fn capabilities(&self) -> HashSet<TaskType>;

    /// Produce a validated plan for the run's prompt.
    async fn plan(&self, ctx: &RunContext, gateway: &LlmGateway) -> Result<Plan>;

    /// Execute a single task, dispatching on `task.task_type`.
    async fn execute_task(
        &self,
        task: &Task,
        ctx: &RunContext,
        gateway: &LlmGateway,
        sandbox: &dyn Sandbox,
    ) -> Result<TaskResult>;

    /// Produce the run's final synthesized output from its completed tasks.
    async fn synthesize(&self, ctx: &RunContext, gateway: &LlmGateway, tasks: &[Task]) -> Result<String>;
}

// Compile-time assertion: Agent must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Agent) {}
};

/// Build the JSON payload forwarded to the sandbox for a task: its
/// description and, when present, its expected output (used by some
/// sandbox actions as an acceptance hint).
fn sandbox_payload(task: &Task) -> serde_json::Value {
    serde_json::json!({
        "description": task.description,
        "expected_output": task.expected_output,
    })
}

/// Run the task's description through the sandbox's filesystem operations.
/// Shared by every agent variant that supports `analyze`/`edit`.
///
/// A filesystem task's description is expected to carry the
/// workspace-relative path as its first whitespace-delimited token (e.g.
/// `"src/lib.rs: add an error variant"`); this keeps `Task` free of a
/// sandbox-specific schema while still letting path validation run before
/// the action reaches the sandbox.
pub(crate) async fn dispatch_filesystem(task: &Task, sandbox: &dyn Sandbox) -> Result<TaskResult> {
    let op = match task.task_type {
        TaskType::Analyze => "read_file",
        TaskType::Edit => "write_file",
        other => anyhow::bail!("dispatch_filesystem called for non-filesystem task type {other}"),
    };

    if let Some((path, _rest)) = task.description.split_once(':') {
        validate_workspace_path(path.trim())?;
    }

    let value = sandbox
        .execute(SandboxAction {
            plugin: "filesystem".to_string(),
            action: op.to_string(),
            payload: sandbox_payload(task),
        })
        .await?;

    Ok(TaskResult {
        content: value.to_string(),
        metadata: Some(value),
    })
}

/// Run the task's description as an allow-listed shell command.
pub(crate) async fn dispatch_shell(task: &Task, sandbox: &dyn Sandbox) -> Result<TaskResult> {
    validate_shell_command(&task.description)?;

    let value = sandbox
        .execute(SandboxAction {
            plugin: "node".to_string(),
            action: "run".to_string(),
            payload: sandbox_payload(task),
        })
        .await?;

    Ok(TaskResult {
        content: value.to_string(),
        metadata: Some(value),
    })
}

/// Run a git operation through the sandbox. The specific git action
/// (`status`/`diff`/`stage`/`unstage`/`commit`) is the task's first word.
pub(crate) async fn dispatch_git(task: &Task, sandbox: &dyn Sandbox) -> Result<TaskResult> {
    let action = task
        .description
        .split_whitespace()
        .next()
        .filter(|w| matches!(*w, "status" | "diff" | "stage" | "unstage" | "commit"))
        .unwrap_or("status");

    let value = sandbox
        .execute(SandboxAction {
            plugin: "git".to_string(),
            action: action.to_string(),
            payload: sandbox_payload(task),
        })
        .await?;

    Ok(TaskResult {
        content: value.to_string(),
        metadata: Some(value),
    })
}

/// Call the LLM gateway with the task's description as input.
pub(crate) async fn dispatch_review(
    task: &Task,
    ctx: &RunContext,
    gateway: &LlmGateway,
) -> Result<TaskResult> {
    let system_prompt = "You are reviewing a piece of work. Be concise and specific.";
    let response = gateway
        .generate_text(
            ctx.run_id,
            &ctx.session_id,
            system_prompt,
            &task.description,
            0.3,
            &crate::llm::ModelOverride::default(),
        )
        .await?;

    Ok(TaskResult {
        content: response.value,
        metadata: None,
    })
}

/// Deterministic fallback synthesis: a summary listing completed tasks.
/// Used both as the default when an agent has no bespoke synthesis and as
/// the budget-exhaustion fallback the RunEngine falls back to.
pub(crate) fn default_synthesize(tasks: &[Task]) -> Result<String> {
    let done: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == engine_db::models::TaskStatus::Done)
        .collect();

    if done.is_empty() {
        return Ok("No tasks completed.".to_string());
    }

    let mut summary = String::from("Completed tasks:\n");
    for task in done {
        summary.push_str(&format!("- {}\n", task.description));
    }
    Ok(summary)
}
