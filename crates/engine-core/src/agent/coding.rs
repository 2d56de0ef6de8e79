//! `CodingAgent` -- supports every task type.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use engine_db::models::{Task, TaskType};

use crate::llm::LlmGateway;
use crate::planner::{Plan, Planner};
use crate::sandbox::Sandbox;

use super::{Agent, RunContext, TaskResult};

/// The general-purpose agent: plans, executes, and synthesizes across the
/// full task-type surface.
#[derive(Default)]
pub struct CodingAgent;

impl CodingAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for CodingAgent {
    fn name(&self) -> &str {
        "coding"
    }

    fn capabilities(&self) -> HashSet<TaskType> {
        HashSet::from([
            TaskType::Analyze,
            TaskType::Edit,
            TaskType::Test,
            TaskType::Review,
            TaskType::Git,
            TaskType::Shell,
        ])
    }

    async fn plan(&self, ctx: &RunContext, gateway: &LlmGateway) -> Result<Plan> {
        Planner::plan(gateway, ctx.run_id, &ctx.session_id, &ctx.prompt)
            .await
            .map_err(Into::into)
    }

    async fn execute_task(
        &self,
        task: &Task,
        ctx: &RunContext,
        gateway: &LlmGateway,
        sandbox: &dyn Sandbox,
    ) -> Result<TaskResult> {
        match task.task_type {
            TaskType::Analyze | TaskType::Edit => super::dispatch_filesystem(task, sandbox).await,
            TaskType::Test | TaskType::Shell => super::dispatch_shell(task, sandbox).await,
            TaskType::Git => super::dispatch_git(task, sandbox).await,
            TaskType::Review => super::dispatch_review(task, ctx, gateway).await,
        }
    }

    async fn synthesize(&self, _ctx: &RunContext, _gateway: &LlmGateway, tasks: &[Task]) -> Result<String> {
        super::default_synthesize(tasks)
    }
}
