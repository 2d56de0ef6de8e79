//! Maps an [`AgentType`] to its concrete [`Agent`] implementation.

use std::collections::HashMap;

use anyhow::{Result, bail};

use engine_db::models::AgentType;

use super::Agent;

/// A collection of registered [`Agent`] implementations, keyed by
/// [`AgentType`].
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentType, Box<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under the given type. Replaces any existing
    /// registration for that type.
    pub fn register(&mut self, agent_type: AgentType, agent: impl Agent + 'static) {
        self.agents.insert(agent_type, Box::new(agent));
    }

    /// Look up the agent for a type. In strict mode an unknown type fails
    /// fast rather than silently falling back to a default.
    pub fn get(&self, agent_type: AgentType) -> Result<&dyn Agent> {
        self.agents
            .get(&agent_type)
            .map(|b| b.as_ref())
            .ok_or_else(|| {
                anyhow::anyhow!("no agent registered for type {agent_type} (strict mode)")
            })
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Build a registry with the standard agents registered against their
/// canonical type. Unregistered types (currently `ci`) fail fast via
/// [`AgentRegistry::get`] until a CI-specific agent is added.
pub fn default_registry() -> Result<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    registry.register(AgentType::Coding, super::CodingAgent::new());
    registry.register(AgentType::Review, super::ReviewAgent::new());
    if registry.is_empty() {
        bail!("default agent registry failed to register any agent");
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_resolves_coding_and_review() {
        let registry = default_registry().unwrap();
        assert!(registry.get(AgentType::Coding).is_ok());
        assert!(registry.get(AgentType::Review).is_ok());
    }

    #[test]
    fn unregistered_type_fails_fast() {
        let registry = default_registry().unwrap();
        assert!(registry.get(AgentType::Ci).is_err());
    }
}
