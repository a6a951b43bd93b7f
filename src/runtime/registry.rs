//! Agent registry: owns every [`Agent`] for its lifetime, indexes by type,
//! and resolves dependency order (§4.6).
//!
//! Grounded on `models::workflow::WorkflowDefinition::find_unreachable_states()`'s
//! traversal pattern, reused here via [`crate::topo::topological_sort`] for
//! the agent dependency graph instead of a workflow's step graph.

use crate::error::{OrchestratorError, Result};
use crate::ids::AgentId;
use crate::runtime::agent::Agent;
use crate::topo::topological_sort;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// The single source of truth for agent identity (§5 Shared-resource
/// policy): an [`Agent`] is owned exclusively by the registry once
/// registered.
pub struct AgentRegistry {
    agents: DashMap<AgentId, Arc<Agent>>,
    by_type: DashMap<String, Vec<AgentId>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self { agents: DashMap::new(), by_type: DashMap::new() }
    }

    pub fn register(&self, agent: Agent) -> Result<()> {
        let id = agent.definition.id.clone();
        if self.agents.contains_key(&id) {
            return Err(OrchestratorError::AlreadyExists(format!("agent {id}")));
        }
        let agent_type = agent.definition.agent_type.clone();
        info!(agent_id = %id, agent_type = %agent_type, "registering agent");
        self.by_type.entry(agent_type).or_default().push(id.clone());
        self.agents.insert(id, Arc::new(agent));
        Ok(())
    }

    pub async fn unregister(&self, id: &AgentId) -> Result<()> {
        let Some((_, agent)) = self.agents.remove(id) else {
            return Err(OrchestratorError::NotFound(format!("agent {id}")));
        };
        if let Some(mut ids) = self.by_type.get_mut(&agent.definition.agent_type) {
            ids.retain(|a| a != id);
        }
        agent.cleanup().await
    }

    pub fn get(&self, id: &AgentId) -> Option<Arc<Agent>> {
        self.agents.get(id).map(|entry| entry.value().clone())
    }

    pub fn has(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    pub fn find_by_type(&self, agent_type: &str) -> Vec<Arc<Agent>> {
        self.by_type
            .get(agent_type)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Topologically orders `id`'s transitive dependency graph (dependencies
    /// before dependents). A cycle, or a reference to an unregistered agent,
    /// fails the call.
    pub fn resolve_dependencies(&self, id: &AgentId) -> Result<Vec<AgentId>> {
        let mut all_ids = Vec::new();
        let mut frontier = vec![id.clone()];
        let mut seen = std::collections::HashSet::new();
        while let Some(current) = frontier.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let agent = self
                .get(&current)
                .ok_or_else(|| OrchestratorError::NotFound(format!("agent {current}")))?;
            all_ids.push(current.clone());
            frontier.extend(agent.definition.dependencies.iter().cloned());
        }

        topological_sort(&all_ids, |node| {
            self.get(node).map(|a| a.definition.dependencies.clone()).unwrap_or_default()
        })
    }

    /// Unregisters every agent, collecting individual cleanup failures into
    /// one combined diagnostic rather than stopping at the first.
    pub async fn clear(&self) -> Result<()> {
        let ids: Vec<AgentId> = self.agents.iter().map(|entry| entry.key().clone()).collect();
        let mut failures = Vec::new();
        for id in ids {
            if let Err(err) = self.unregister(&id).await {
                failures.push(format!("{id}: {err}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Internal(format!("clear() had {} failure(s): {}", failures.len(), failures.join("; "))))
        }
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::agent::{AgentDefinition, AgentHooks};
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoopHooks;

    #[async_trait]
    impl AgentHooks for NoopHooks {
        async fn on_initialize(&self) -> Result<()> {
            Ok(())
        }
        async fn on_execute(&self, input: Value, _context: Value, _execution_id: crate::ids::ExecutionId) -> Result<Value> {
            Ok(input)
        }
        async fn on_cleanup(&self) -> Result<()> {
            Ok(())
        }
    }

    fn agent_with_deps(id: &str, deps: &[&str]) -> Agent {
        let mut def = AgentDefinition::new(id, id, "1.0.0", "task");
        def.dependencies = deps.iter().map(|d| AgentId::new(*d)).collect();
        Agent::new(def, Arc::new(NoopHooks))
    }

    #[test]
    fn register_rejects_duplicate_ids() {
        let registry = AgentRegistry::new();
        registry.register(agent_with_deps("a", &[])).unwrap();
        let err = registry.register(agent_with_deps("a", &[])).unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyExists(_)));
    }

    #[test]
    fn resolve_dependencies_orders_transitively() {
        let registry = AgentRegistry::new();
        registry.register(agent_with_deps("extract", &[])).unwrap();
        registry.register(agent_with_deps("analyze", &["extract"])).unwrap();
        registry.register(agent_with_deps("estimate", &["analyze"])).unwrap();

        let order = registry.resolve_dependencies(&AgentId::new("estimate")).unwrap();
        assert_eq!(order, vec![AgentId::new("extract"), AgentId::new("analyze"), AgentId::new("estimate")]);
    }

    #[test]
    fn resolve_dependencies_detects_a_cycle() {
        let registry = AgentRegistry::new();
        let mut a = AgentDefinition::new("a", "a", "1.0.0", "task");
        a.dependencies = vec![AgentId::new("b")];
        let mut b = AgentDefinition::new("b", "b", "1.0.0", "task");
        b.dependencies = vec![AgentId::new("a")];
        registry.register(Agent::new(a, Arc::new(NoopHooks))).unwrap();
        registry.register(Agent::new(b, Arc::new(NoopHooks))).unwrap();

        let err = registry.resolve_dependencies(&AgentId::new("a")).unwrap_err();
        assert!(matches!(err, OrchestratorError::Cycle(_)));
    }

    #[tokio::test]
    async fn unregister_calls_cleanup_and_removes_from_index() {
        let registry = AgentRegistry::new();
        registry.register(agent_with_deps("a", &[])).unwrap();
        registry.unregister(&AgentId::new("a")).await.unwrap();
        assert!(!registry.has(&AgentId::new("a")));
        assert!(registry.find_by_type("task").is_empty());
    }
}
