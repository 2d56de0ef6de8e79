//! Pricing resolution and the append-only cost ledger.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use engine_db::models::PricingSource;
use engine_db::queries::cost_events::{self as db, CostAggregate};

use crate::llm::LlmError;

/// Per-1K-token rates for a single model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRate {
    pub prompt_rate_per_1k: f64,
    pub completion_rate_per_1k: f64,
}

/// A mapping from `provider/model` to its per-token rates.
///
/// Optionally seed-locked: when `fail_on_unseeded_pricing` is set, recording
/// usage for a model absent from the table is an error rather than a silent
/// zero-cost fallback.
#[derive(Debug, Clone, Default)]
pub struct PricingRegistry {
    rates: HashMap<String, ModelRate>,
    fail_on_unseeded_pricing: bool,
}

impl PricingRegistry {
    pub fn new(fail_on_unseeded_pricing: bool) -> Self {
        Self {
            rates: HashMap::new(),
            fail_on_unseeded_pricing,
        }
    }

    pub fn seed(&mut self, provider: &str, model: &str, rate: ModelRate) {
        self.rates.insert(Self::key(provider, model), rate);
    }

    fn key(provider: &str, model: &str) -> String {
        format!("{provider}/{model}")
    }

    pub fn lookup(&self, provider: &str, model: &str) -> Option<ModelRate> {
        self.rates.get(&Self::key(provider, model)).copied()
    }

    pub fn is_seeded(&self, provider: &str, model: &str) -> bool {
        self.rates.contains_key(&Self::key(provider, model))
    }

    pub fn fail_on_unseeded_pricing(&self) -> bool {
        self.fail_on_unseeded_pricing
    }
}

/// How to handle usage for a model with no known rate and no provider-supplied cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownPricingMode {
    /// Log a warning and record a zero-cost event.
    Warn,
    /// Reject the call before any cost event is recorded.
    Block,
}

/// Raw usage reported for a single LLM call, before pricing.
#[derive(Debug, Clone)]
pub struct LlmUsage {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    /// Cost reported directly by the provider, if any.
    pub cost: Option<f64>,
}

/// The resolved cost and its provenance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedCost {
    pub cost: f64,
    pub pricing_source: PricingSource,
}

/// Turns raw usage into a priced, sourced cost.
pub struct PricingResolver {
    registry: PricingRegistry,
    unknown_pricing_mode: UnknownPricingMode,
}

impl PricingResolver {
    pub fn new(registry: PricingRegistry, unknown_pricing_mode: UnknownPricingMode) -> Self {
        Self {
            registry,
            unknown_pricing_mode,
        }
    }

    /// Resolve `usage` into a cost and its source.
    ///
    /// - A provider-supplied cost always wins (`pricingSource = provider`).
    /// - Otherwise a registry lookup is tried (`pricingSource = registry`).
    /// - Otherwise the model is unpriced: `cost = 0`, and per
    ///   `unknown_pricing_mode`, either a warning is logged or the call is
    ///   rejected before any event is recorded.
    pub fn resolve(&self, usage: &LlmUsage) -> Result<ResolvedCost, LlmError> {
        if let Some(cost) = usage.cost {
            return Ok(ResolvedCost {
                cost,
                pricing_source: PricingSource::Provider,
            });
        }

        if self.registry.fail_on_unseeded_pricing()
            && !self.registry.is_seeded(&usage.provider, &usage.model)
        {
            return Err(LlmError::UnknownPricing {
                provider: usage.provider.clone(),
                model: usage.model.clone(),
            });
        }

        if let Some(rate) = self.registry.lookup(&usage.provider, &usage.model) {
            let cost = (usage.prompt_tokens as f64 / 1000.0) * rate.prompt_rate_per_1k
                + (usage.completion_tokens as f64 / 1000.0) * rate.completion_rate_per_1k;
            return Ok(ResolvedCost {
                cost,
                pricing_source: PricingSource::Registry,
            });
        }

        match self.unknown_pricing_mode {
            UnknownPricingMode::Warn => {
                tracing::warn!(
                    provider = %usage.provider,
                    model = %usage.model,
                    "no pricing known for model; recording zero cost"
                );
                Ok(ResolvedCost {
                    cost: 0.0,
                    pricing_source: PricingSource::Unknown,
                })
            }
            UnknownPricingMode::Block => Err(LlmError::UnknownPricing {
                provider: usage.provider.clone(),
                model: usage.model.clone(),
            }),
        }
    }
}

/// Append-only usage ledger over `cost_events`.
pub struct CostLedger;

/// Aggregate totals for a run: total cost, total tokens, event count, and
/// the per-model / per-provider cost breakdowns.
#[derive(Debug, Clone, Default)]
pub struct CostSummary {
    pub total_cost: f64,
    pub total_tokens: i64,
    pub event_count: i64,
    pub by_model: HashMap<String, f64>,
    pub by_provider: HashMap<String, f64>,
}

impl CostLedger {
    /// Append a single immutable cost event. There is no update/delete
    /// counterpart anywhere in this crate -- append-only is structural.
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        pool: &PgPool,
        run_id: Uuid,
        session_id: Option<String>,
        provider: &str,
        model: &str,
        prompt_tokens: i32,
        completion_tokens: i32,
        cost: f64,
        pricing_source: PricingSource,
    ) -> Result<()> {
        db::append_event(
            pool,
            run_id,
            session_id.as_deref(),
            provider,
            model,
            prompt_tokens,
            completion_tokens,
            cost,
            pricing_source,
        )
        .await?;
        Ok(())
    }

    /// `aggregate(runId)`: total cost, total tokens, event count, and the
    /// per-model / per-provider breakdowns.
    pub async fn aggregate(pool: &PgPool, run_id: Uuid) -> Result<CostSummary> {
        let raw: CostAggregate = db::aggregate_for_run(pool, run_id).await?;

        Ok(CostSummary {
            total_cost: raw.total_cost,
            total_tokens: raw.total_tokens,
            event_count: raw.event_count,
            by_model: raw.by_model.into_iter().collect(),
            by_provider: raw.by_provider.into_iter().collect(),
        })
    }

    /// Sum of a session's cost across all its runs.
    pub async fn aggregate_for_session(pool: &PgPool, session_id: &str) -> Result<f64> {
        db::aggregate_for_session(pool, session_id).await
    }
}
