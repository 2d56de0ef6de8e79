//! `engine run`: execute a fresh run to completion.

use anyhow::{Context, Result};

use engine_core::engine::{RunEngine, RunEngineInput};
use engine_db::models::AgentType;

fn parse_agent_type(s: &str) -> Result<AgentType> {
    match s {
        "coding" => Ok(AgentType::Coding),
        "review" => Ok(AgentType::Review),
        "ci" => Ok(AgentType::Ci),
        other => anyhow::bail!("unknown agent type '{other}', expected coding|review|ci"),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run_run(
    engine: &RunEngine,
    agent_type: &str,
    session_id: &str,
    prompt: &str,
    provider_id: Option<String>,
    model_id: Option<String>,
) -> Result<()> {
    let input = RunEngineInput {
        agent_type: parse_agent_type(agent_type)?,
        session_id: session_id.to_string(),
        prompt: prompt.to_string(),
        provider_id,
        model_id,
    };

    let outcome = engine.execute(input).await.context("run failed")?;

    println!("Run {} finished as {}", outcome.run_id, outcome.status);
    if let Some(output) = outcome.output {
        println!();
        println!("{output}");
    }

    Ok(())
}
