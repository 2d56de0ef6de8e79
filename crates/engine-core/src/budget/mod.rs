//! Per-run and per-session cost caps, checked before every LLM call.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::llm::LlmError;

/// Configuration for the budget manager. Either cap may be absent, meaning
/// unlimited for that scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetConfig {
    pub max_cost_per_run: Option<f64>,
    pub max_cost_per_session: Option<f64>,
}

#[derive(Debug, Default)]
struct Totals {
    per_run: HashMap<Uuid, f64>,
    per_session: HashMap<String, f64>,
}

/// Tracks running cost totals in memory and rejects calls that would push a
/// run or session over its configured cap.
///
/// Session totals are seeded once via [`BudgetManager::load_session_costs`]
/// at startup and kept in memory from then on; per-run totals start at zero
/// for a fresh run and accumulate as cost events are recorded.
#[derive(Clone)]
pub struct BudgetManager {
    config: BudgetConfig,
    totals: Arc<RwLock<Totals>>,
}

impl BudgetManager {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            totals: Arc::new(RwLock::new(Totals::default())),
        }
    }

    /// Seed a session's running total, e.g. from historical cost events
    /// loaded at startup.
    pub async fn load_session_costs(&self, session_id: &str, total: f64) {
        let mut totals = self.totals.write().await;
        totals.per_session.insert(session_id.to_string(), total);
    }

    /// Check whether adding `estimated_cost` to the run's and session's
    /// running totals would exceed their configured caps. Does not mutate
    /// state -- the check must happen before any network I/O; the actual
    /// total is only updated once the call succeeds, via
    /// [`BudgetManager::record_spend`].
    pub async fn check_before_call(
        &self,
        run_id: Uuid,
        session_id: &str,
        estimated_cost: f64,
    ) -> Result<(), LlmError> {
        let totals = self.totals.read().await;

        if let Some(cap) = self.config.max_cost_per_run {
            let current = totals.per_run.get(&run_id).copied().unwrap_or(0.0);
            let would_reach = current + estimated_cost;
            if would_reach > cap {
                return Err(LlmError::BudgetExceeded {
                    run_id,
                    would_reach,
                    cap,
                });
            }
        }

        if let Some(cap) = self.config.max_cost_per_session {
            let current = totals.per_session.get(session_id).copied().unwrap_or(0.0);
            let would_reach = current + estimated_cost;
            if would_reach > cap {
                return Err(LlmError::SessionBudgetExceeded {
                    session_id: session_id.to_string(),
                    would_reach,
                    cap,
                });
            }
        }

        Ok(())
    }

    /// Record that `cost` was actually spent against a run and session,
    /// after a call has succeeded and its CostEvent has been appended.
    pub async fn record_spend(&self, run_id: Uuid, session_id: &str, cost: f64) {
        let mut totals = self.totals.write().await;
        *totals.per_run.entry(run_id).or_insert(0.0) += cost;
        *totals.per_session.entry(session_id.to_string()).or_insert(0.0) += cost;
    }

    /// Current known total for a run (for synthesis fallback messaging).
    pub async fn run_total(&self, run_id: Uuid) -> f64 {
        self.totals.read().await.per_run.get(&run_id).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_calls_under_cap() {
        let manager = BudgetManager::new(BudgetConfig {
            max_cost_per_run: Some(1.0),
            max_cost_per_session: None,
        });
        let run_id = Uuid::new_v4();
        assert!(manager.check_before_call(run_id, "s1", 0.5).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_calls_that_would_exceed_run_cap() {
        let manager = BudgetManager::new(BudgetConfig {
            max_cost_per_run: Some(0.01),
            max_cost_per_session: None,
        });
        let run_id = Uuid::new_v4();
        manager.record_spend(run_id, "s1", 0.02).await;

        let result = manager.check_before_call(run_id, "s1", 0.0).await;
        assert!(matches!(result, Err(LlmError::BudgetExceeded { .. })));
    }

    #[tokio::test]
    async fn rejects_calls_that_would_exceed_session_cap() {
        let manager = BudgetManager::new(BudgetConfig {
            max_cost_per_run: None,
            max_cost_per_session: Some(1.0),
        });
        manager.load_session_costs("s1", 0.9).await;

        let result = manager
            .check_before_call(Uuid::new_v4(), "s1", 0.2)
            .await;
        assert!(matches!(result, Err(LlmError::SessionBudgetExceeded { .. })));
    }

    #[tokio::test]
    async fn unlimited_caps_never_reject() {
        let manager = BudgetManager::new(BudgetConfig::default());
        let run_id = Uuid::new_v4();
        manager.record_spend(run_id, "s1", 1_000_000.0).await;
        assert!(manager.check_before_call(run_id, "s1", 1.0).await.is_ok());
    }
}
