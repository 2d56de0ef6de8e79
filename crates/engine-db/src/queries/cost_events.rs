//! Database query functions for the append-only `cost_events` table.
//!
//! There is deliberately no `update_*`/`delete_*` function here: the ledger
//! is append-only (spec invariant: aggregate cost always equals the sum of
//! recorded events), and the absence of a mutation API is what enforces it.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CostEvent, PricingSource};

/// Append a single usage event. Returns the inserted row with its
/// server-generated `id` and `recorded_at`.
#[allow(clippy::too_many_arguments)]
pub async fn append_event(
    pool: &PgPool,
    run_id: Uuid,
    session_id: Option<&str>,
    provider: &str,
    model: &str,
    prompt_tokens: i32,
    completion_tokens: i32,
    cost: f64,
    pricing_source: PricingSource,
) -> Result<CostEvent> {
    let event = sqlx::query_as::<_, CostEvent>(
        "INSERT INTO cost_events \
            (run_id, session_id, provider, model, prompt_tokens, completion_tokens, cost, pricing_source) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(run_id)
    .bind(session_id)
    .bind(provider)
    .bind(model)
    .bind(prompt_tokens)
    .bind(completion_tokens)
    .bind(cost)
    .bind(pricing_source)
    .fetch_one(pool)
    .await
    .context("failed to append cost event")?;

    Ok(event)
}

/// Aggregate totals for a single run.
#[derive(Debug, Clone, Default)]
pub struct CostAggregate {
    pub total_cost: f64,
    pub total_tokens: i64,
    pub event_count: i64,
    pub by_model: Vec<(String, f64)>,
    pub by_provider: Vec<(String, f64)>,
}

/// Aggregate all cost events recorded for a run.
pub async fn aggregate_for_run(pool: &PgPool, run_id: Uuid) -> Result<CostAggregate> {
    let totals: (Option<f64>, Option<i64>, i64) = sqlx::query_as(
        "SELECT SUM(cost), SUM(prompt_tokens + completion_tokens), COUNT(*) \
         FROM cost_events WHERE run_id = $1",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await
    .context("failed to aggregate cost events for run")?;

    let by_model: Vec<(String, f64)> = sqlx::query_as(
        "SELECT model, SUM(cost) FROM cost_events WHERE run_id = $1 GROUP BY model",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("failed to aggregate cost events by model")?;

    let by_provider: Vec<(String, f64)> = sqlx::query_as(
        "SELECT provider, SUM(cost) FROM cost_events WHERE run_id = $1 GROUP BY provider",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("failed to aggregate cost events by provider")?;

    Ok(CostAggregate {
        total_cost: totals.0.unwrap_or(0.0),
        total_tokens: totals.1.unwrap_or(0),
        event_count: totals.2,
        by_model,
        by_provider,
    })
}

/// Sum of cost across every run in a session. Used to seed
/// `BudgetManager::load_session_costs` at startup.
pub async fn aggregate_for_session(pool: &PgPool, session_id: &str) -> Result<f64> {
    let row: (Option<f64>,) =
        sqlx::query_as("SELECT SUM(cost) FROM cost_events WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(pool)
            .await
            .context("failed to aggregate cost events for session")?;

    Ok(row.0.unwrap_or(0.0))
}
