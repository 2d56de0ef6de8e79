//! `ReviewAgent` -- supports only `analyze` and `review` task types.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use engine_db::models::{Task, TaskType};

use crate::llm::LlmGateway;
use crate::planner::{Plan, Planner};
use crate::sandbox::Sandbox;

use super::{Agent, RunContext, TaskResult, UnsupportedTaskType};

/// A narrower agent used for read-only review runs: it never edits the
/// workspace or runs shell commands.
#[derive(Default)]
pub struct ReviewAgent;

impl ReviewAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for ReviewAgent {
    fn name(&self) -> &str {
        "review"
    }

    fn capabilities(&self) -> HashSet<TaskType> {
        HashSet::from([TaskType::Analyze, TaskType::Review])
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
            TaskType::Analyze => super::dispatch_filesystem(task, sandbox).await,
            TaskType::Review => super::dispatch_review(task, ctx, gateway).await,
            other => Err(UnsupportedTaskType {
                agent: self.name().to_string(),
                task_type: other,
            }
            .into()),
        }
    }

    async fn synthesize(&self, _ctx: &RunContext, _gateway: &LlmGateway, tasks: &[Task]) -> Result<String> {
        super::default_synthesize(tasks)
    }
}
