//! Turns a prompt into a validated [`Plan`] via the LLM gateway.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use engine_db::models::TaskType;

use crate::dag::{TaskNode, validate_dag};
use crate::llm::LlmGateway;

/// A single planned task, as produced by the LLM before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub description: String,
    pub depends_on: Vec<Uuid>,
    pub expected_output: Option<String>,
}

/// Metadata accompanying a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub estimated_steps: Option<u32>,
    pub reasoning: Option<String>,
}

/// A validated, ordered, non-empty set of planned tasks (at most 20).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<PlannedTask>,
    #[serde(default)]
    pub metadata: PlanMetadata,
}

/// Errors raised while building or validating a plan.
///
/// No retry is attempted at this layer; a caller (the RunEngine) decides
/// whether to re-plan.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("planner produced an empty task list")]
    Empty,

    #[error("planner produced too many tasks: {0} (limit 20)")]
    TooManyTasks(usize),

    #[error("plan failed dependency validation: {0}")]
    InvalidDag(String),

    #[error("plan references unknown task id in dependsOn: {0}")]
    UnknownDependency(Uuid),

    #[error(transparent)]
    Gateway(#[from] anyhow::Error),
}

const MAX_TASKS: usize = 20;

/// Low temperature used for plan generation -- we want a reproducible,
/// schema-conformant structure rather than creative variation.
const PLANNER_TEMPERATURE: f32 = 0.2;

const SYSTEM_PROMPT: &str = "You are a planning assistant for an autonomous coding agent. \
Given a user request, decompose it into a small, ordered set of tasks. \
Each task has a type (analyze, edit, test, review, git, or shell), a \
description, and an optional list of task ids it depends on. Respond with \
a JSON object matching the provided schema only.";

pub struct Planner;

impl Planner {
    /// Build the system+user message pair, ask the gateway for a
    /// schema-validated plan, and validate the resulting DAG.
    ///
    /// Goes through the same budget-checked, cost-recorded gateway path as
    /// every other LLM call -- planning is not exempt from the budget gate
    /// or the cost ledger.
    pub async fn plan(gateway: &LlmGateway, run_id: Uuid, session_id: &str, prompt: &str) -> Result<Plan, PlannerError> {
        let user_prompt = format!("Run: {run_id}\nUser request:\n{prompt}");

        let response: crate::llm::GatewayResponse<Plan> = gateway
            .generate_structured_for_run(
                run_id,
                session_id,
                SYSTEM_PROMPT,
                &user_prompt,
                PLANNER_TEMPERATURE,
                &crate::llm::ModelOverride::default(),
            )
            .await
            .map_err(PlannerError::Gateway)?;
        let plan = response.value;

        Self::validate(&plan)?;
        Ok(plan)
    }

    fn validate(plan: &Plan) -> Result<(), PlannerError> {
        if plan.tasks.is_empty() {
            return Err(PlannerError::Empty);
        }
        if plan.tasks.len() > MAX_TASKS {
            return Err(PlannerError::TooManyTasks(plan.tasks.len()));
        }

        let known: std::collections::HashSet<Uuid> = plan.tasks.iter().map(|t| t.id).collect();
        for task in &plan.tasks {
            for dep in &task.depends_on {
                if !known.contains(dep) {
                    return Err(PlannerError::UnknownDependency(*dep));
                }
            }
        }

        let nodes: Vec<TaskNode> = plan
            .tasks
            .iter()
            .map(|t| TaskNode {
                id: t.id,
                depends_on: t.depends_on.clone(),
            })
            .collect();

        let result = validate_dag(&nodes);
        if !result.valid {
            return Err(PlannerError::InvalidDag(
                result.error.unwrap_or_else(|| "invalid dag".to_string()),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: Uuid, deps: &[Uuid]) -> PlannedTask {
        PlannedTask {
            id,
            task_type: TaskType::Analyze,
            description: "do something".to_string(),
            depends_on: deps.to_vec(),
            expected_output: None,
        }
    }

    #[test]
    fn rejects_empty_plan() {
        let plan = Plan {
            tasks: vec![],
            metadata: PlanMetadata::default(),
        };
        assert!(matches!(Planner::validate(&plan), Err(PlannerError::Empty)));
    }

    #[test]
    fn rejects_too_many_tasks() {
        let tasks = (0..21).map(|_| task(Uuid::new_v4(), &[])).collect();
        let plan = Plan {
            tasks,
            metadata: PlanMetadata::default(),
        };
        assert!(matches!(
            Planner::validate(&plan),
            Err(PlannerError::TooManyTasks(21))
        ));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let a = Uuid::new_v4();
        let stray = Uuid::new_v4();
        let plan = Plan {
            tasks: vec![task(a, &[stray])],
            metadata: PlanMetadata::default(),
        };
        assert!(matches!(
            Planner::validate(&plan),
            Err(PlannerError::UnknownDependency(_))
        ));
    }

    #[test]
    fn rejects_cyclic_plan() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let plan = Plan {
            tasks: vec![task(a, &[b]), task(b, &[a])],
            metadata: PlanMetadata::default(),
        };
        assert!(matches!(
            Planner::validate(&plan),
            Err(PlannerError::InvalidDag(_))
        ));
    }

    #[test]
    fn accepts_valid_linear_plan() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let plan = Plan {
            tasks: vec![task(a, &[]), task(b, &[a])],
            metadata: PlanMetadata::default(),
        };
        assert!(Planner::validate(&plan).is_ok());
    }
}
