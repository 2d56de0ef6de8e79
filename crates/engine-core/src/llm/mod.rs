//! Provider-neutral LLM access, wrapped with budget enforcement and usage
//! accounting.
//!
//! [`AIService`] is the thin interface a concrete provider adapter
//! implements. [`LlmGateway`] is what the rest of the engine calls: it
//! resolves the target model, checks the budget, delegates to the service,
//! prices the usage, and appends a [`CostEvent`] -- atomically with respect
//! to a single call.

pub mod http;

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use uuid::Uuid;

use crate::budget::BudgetManager;
use crate::cost::{CostLedger, LlmUsage, PricingResolver};

pub use http::HttpAiService;

/// Optional explicit provider/model override. Both fields must be present
/// or both absent -- a partial override is a `PolicyError` at the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelOverride {
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
}

impl ModelOverride {
    pub fn validate(&self) -> Result<(), LlmError> {
        match (&self.provider_id, &self.model_id) {
            (Some(_), Some(_)) | (None, None) => Ok(()),
            _ => Err(LlmError::PartialOverride),
        }
    }
}

/// Usage reported by a provider for a single call.
#[derive(Debug, Clone, Default)]
pub struct ProviderUsage {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    /// Cost reported directly by the provider, if it supplies one.
    pub cost: Option<f64>,
}

/// A single chunk of a streamed response.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
}

/// The result of a gateway call.
#[derive(Debug, Clone)]
pub struct GatewayResponse<T> {
    pub value: T,
    pub usage: ProviderUsage,
    pub provider_request_id: Option<String>,
}

/// Errors surfaced by the LLM gateway.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider/model override must specify both providerId and modelId, or neither")]
    PartialOverride,

    #[error("budget exceeded for run {run_id}: would reach {would_reach:.4}, cap {cap:.4}")]
    BudgetExceeded {
        run_id: Uuid,
        would_reach: f64,
        cap: f64,
    },

    #[error("session budget exceeded for session {session_id}: would reach {would_reach:.4}, cap {cap:.4}")]
    SessionBudgetExceeded {
        session_id: String,
        would_reach: f64,
        cap: f64,
    },

    #[error("pricing unknown for {provider}/{model} and unknownPricingMode is block")]
    UnknownPricing { provider: String, model: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("failed to parse structured response: {0}")]
    Parse(String),
}

/// Provider-neutral interface offering the three call shapes the engine
/// needs. A concrete implementation adapts a specific vendor SDK or HTTP
/// API.
#[async_trait]
pub trait AIService: Send + Sync {
    /// Generate free-form text.
    async fn generate_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        model_override: &ModelOverride,
    ) -> Result<(String, ProviderUsage, Option<String>)>;

    /// Generate a value conforming to a caller-provided JSON shape, returned
    /// as a raw JSON string for the gateway to deserialize.
    async fn generate_structured_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        model_override: &ModelOverride,
    ) -> Result<(String, ProviderUsage, Option<String>)>;

    /// Open a streaming chat completion.
    async fn create_chat_stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        model_override: &ModelOverride,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamChunk> + Send>>>;
}

/// Wraps an [`AIService`] with budget enforcement, pricing resolution, and
/// cost-event recording.
pub struct LlmGateway {
    pool: PgPool,
    service: std::sync::Arc<dyn AIService>,
    budget: BudgetManager,
    pricing: PricingResolver,
    provider_name: String,
    default_model: String,
}

impl LlmGateway {
    pub fn new(
        pool: PgPool,
        service: std::sync::Arc<dyn AIService>,
        budget: BudgetManager,
        pricing: PricingResolver,
        provider_name: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            service,
            budget,
            pricing,
            provider_name: provider_name.into(),
            default_model: default_model.into(),
        }
    }

    fn resolve_model<'a>(&'a self, model_override: &'a ModelOverride) -> Result<(&'a str, &'a str), LlmError> {
        model_override.validate()?;
        let provider = model_override
            .provider_id
            .as_deref()
            .unwrap_or(&self.provider_name);
        let model = model_override.model_id.as_deref().unwrap_or(&self.default_model);
        Ok((provider, model))
    }

    /// Run the shared pre-flight: resolve model, estimate cost (zero unless
    /// the caller supplies one), and check the budget before any network
    /// I/O. Returns the resolved `(provider, model)` pair.
    async fn preflight(
        &self,
        run_id: Uuid,
        session_id: &str,
        model_override: &ModelOverride,
        estimated_cost: f64,
    ) -> Result<(String, String), LlmError> {
        let (provider, model) = self.resolve_model(model_override)?;
        self.budget
            .check_before_call(run_id, session_id, estimated_cost)
            .await?;
        Ok((provider.to_string(), model.to_string()))
    }

    async fn record(
        &self,
        run_id: Uuid,
        session_id: &str,
        provider: &str,
        model: &str,
        usage: &ProviderUsage,
    ) -> Result<(), LlmError> {
        let resolved = self.pricing.resolve(&LlmUsage {
            provider: provider.to_string(),
            model: model.to_string(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            cost: usage.cost,
        })?;

        CostLedger::append(
            &self.pool,
            run_id,
            Some(session_id.to_string()),
            provider,
            model,
            usage.prompt_tokens,
            usage.completion_tokens,
            resolved.cost,
            resolved.pricing_source,
        )
        .await
        .map_err(|e| LlmError::Provider(e.to_string()))?;

        self.budget.record_spend(run_id, session_id, resolved.cost).await;

        Ok(())
    }

    /// Generate free-form text, enforcing budget and recording usage.
    pub async fn generate_text(
        &self,
        run_id: Uuid,
        session_id: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        model_override: &ModelOverride,
    ) -> Result<GatewayResponse<String>> {
        let (provider, model) = self
            .preflight(run_id, session_id, model_override, 0.0)
            .await?;

        let (text, usage, provider_request_id) = self
            .service
            .generate_text(system_prompt, user_prompt, temperature, model_override)
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        self.record(run_id, session_id, &provider, &model, &usage).await?;

        Ok(GatewayResponse {
            value: text,
            usage,
            provider_request_id,
        })
    }

    /// Generate and deserialize a structured value within a run's budget,
    /// recording usage as a cost event.
    pub async fn generate_structured_for_run<T: DeserializeOwned>(
        &self,
        run_id: Uuid,
        session_id: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        model_override: &ModelOverride,
    ) -> Result<GatewayResponse<T>> {
        let (provider, model) = self
            .preflight(run_id, session_id, model_override, 0.0)
            .await?;

        let (json, usage, provider_request_id) = self
            .service
            .generate_structured_json(system_prompt, user_prompt, temperature, model_override)
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        self.record(run_id, session_id, &provider, &model, &usage).await?;

        let value = serde_json::from_str(&json).map_err(|e| LlmError::Parse(e.to_string()))?;

        Ok(GatewayResponse {
            value,
            usage,
            provider_request_id,
        })
    }

    /// Open a streaming chat completion. Usage for the final chunk is
    /// recorded by the caller once the stream completes (the engine drives
    /// this for the synthesis step).
    pub async fn create_chat_stream(
        &self,
        run_id: Uuid,
        session_id: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        model_override: &ModelOverride,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamChunk> + Send>>> {
        self.preflight(run_id, session_id, model_override, 0.0).await?;
        self.service
            .create_chat_stream(system_prompt, user_prompt, temperature, model_override)
            .await
    }
}
