//! `engine budget`: show cost totals for a run or session against the
//! configured caps.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use engine_core::cost::CostLedger;

use crate::config::EngineConfig;

pub async fn run_budget(pool: &PgPool, config: &EngineConfig, run_id: Option<&str>, session_id: Option<&str>) -> Result<()> {
    if let Some(run_id) = run_id {
        let id = Uuid::parse_str(run_id).with_context(|| format!("invalid run ID: {run_id}"))?;
        let summary = CostLedger::aggregate(pool, id).await?;

        println!("Run {id}");
        println!("  total cost:  ${:.4}", summary.total_cost);
        println!("  total tokens: {}", summary.total_tokens);
        println!("  events:       {}", summary.event_count);
        if let Some(cap) = config.budget_config.max_cost_per_run {
            println!("  cap:          ${cap:.4}");
        }
        for (model, cost) in &summary.by_model {
            println!("    {model}: ${cost:.4}");
        }
        return Ok(());
    }

    let session_id = session_id.context("either a run ID or --session is required")?;
    let total = CostLedger::aggregate_for_session(pool, session_id).await?;
    println!("Session {session_id}");
    println!("  total cost: ${total:.4}");
    if let Some(cap) = config.budget_config.max_cost_per_session {
        println!("  cap:        ${cap:.4}");
    }
    Ok(())
}
