// Agent Orchestration Core
// A runtime for coordinating many specialized agents through a phased,
// message-driven workflow: a directed step graph standing in for places
// and tokens, agents standing in for transitions.

//! # Agent Orchestration Core
//!
//! This crate is the execution substrate for a multi-agent code-generation
//! platform: a registry of agents, a declarative workflow engine that runs
//! steps over them in dependency order, and a phase-aware message bus that
//! routes traffic between the twelve lifecycle phases a project moves
//! through (discovery → planning → generation → deployment → handoff).
//!
//! ## Modules
//!
//! - [`ids`] — newtype identifiers (`AgentId`, `StepId`, `WorkflowId`, …)
//! - [`error`] — the crate-wide [`error::OrchestratorError`] taxonomy
//! - [`settings`] — [`settings::RuntimeConfig`], loadable from the environment
//! - [`schema`] — compiled input/output validation for agent contracts
//! - [`tool_client`] — the transport-abstract client agents use to reach
//!   external MCP-style tool servers (HTTP and stdio transports)
//! - [`runtime`] — [`runtime::Agent`]'s lifecycle harness and the
//!   [`runtime::AgentRegistry`] that owns every instance
//! - [`workflow`] — [`workflow::WorkflowEngine`]: DAG-scheduled step
//!   execution, reference-expression resolution, and the condition language
//! - [`bus`] — [`bus::BaseMessageBus`] (pub/sub substrate) and
//!   [`bus::EnhancedMessageBus`] (priority tiers, phase routing, dead
//!   lettering, approval gates) built on top of it
//! - [`context`] — [`context::OrchestratorContext`], the composition root
//!   that wires the above into one running instance
//!
//! ## Example
//!
//! ```rust
//! use orchestrator_core::context::OrchestratorContext;
//!
//! let context = OrchestratorContext::test_default();
//! assert_eq!(context.workflows.list_executions(None).len(), 0);
//! ```

pub mod bus;
pub mod context;
pub mod error;
pub mod ids;
pub mod runtime;
pub mod schema;
pub mod settings;
pub mod tool_client;
pub mod topo;
pub mod workflow;

pub use bus::{BaseMessageBus, EnhancedMessageBus, MessageEnvelope};
pub use context::OrchestratorContext;
pub use error::{OrchestratorError, Result};
pub use runtime::{Agent, AgentDefinition, AgentHooks, AgentRegistry};
pub use settings::RuntimeConfig;
pub use workflow::{WorkflowDefinition, WorkflowEngine, WorkflowExecution, WorkflowStep};

/// Initializes a process-wide `tracing` subscriber: `RUST_LOG` if set,
/// otherwise `default_level`. Safe to call from multiple test binaries in the
/// same process; a subscriber already installed is left in place rather than
/// panicking.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
