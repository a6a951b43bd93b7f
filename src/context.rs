//! Composition root: owns every long-lived service instead of leaving them
//! as ambient globals (DESIGN.md's "ambient global singletons → explicit
//! context" decision). Construct one [`OrchestratorContext`] per running
//! orchestrator and hand `Arc` clones to whatever needs them.

use crate::bus::{BaseMessageBus, EnhancedMessageBus};
use crate::settings::RuntimeConfig;
use crate::runtime::AgentRegistry;
use crate::workflow::WorkflowEngine;
use std::sync::Arc;

pub struct OrchestratorContext {
    pub config: RuntimeConfig,
    pub registry: Arc<AgentRegistry>,
    pub base_bus: Arc<BaseMessageBus>,
    pub bus: Arc<EnhancedMessageBus>,
    pub workflows: Arc<WorkflowEngine>,
}

impl OrchestratorContext {
    pub fn new(config: RuntimeConfig) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let base_bus = Arc::new(BaseMessageBus::new(config.max_history_size));
        let bus = Arc::new(EnhancedMessageBus::new(base_bus.clone(), config.clone()));
        let workflows = Arc::new(WorkflowEngine::new(registry.clone()));
        Self { config, registry, base_bus, bus, workflows }
    }

    /// Test/demo scaffolding: every field built from `RuntimeConfig::default()`.
    pub fn test_default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_wires_every_service() {
        let context = OrchestratorContext::test_default();
        assert!(!context.registry.has(&"nobody".into()));
        assert_eq!(context.workflows.list_executions(None).len(), 0);
    }
}
