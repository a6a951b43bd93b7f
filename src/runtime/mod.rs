//! The agent runtime: per-agent lifecycle harness plus the registry that
//! owns every agent instance (§4.5, §4.6).

pub mod agent;
pub mod registry;

pub use agent::{Agent, AgentDefinition, AgentHooks, AgentState, AgentStatus, ExecutionRecord, ExecutionStatus};
pub use registry::AgentRegistry;
