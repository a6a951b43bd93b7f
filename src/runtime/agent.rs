//! Agent runtime: the lifecycle harness every concrete agent inherits
//! (§4.5). Concrete behavior is supplied by an [`AgentHooks`] implementation;
//! everything else — state transitions, schema validation, timeout-bounded
//! retry, execution history, tool-client ownership — is written once here.
//!
//! Grounded on `models::agent::AgentExecution`'s `new/start/complete/fail`
//! lifecycle (duration computed from `chrono` timestamps) and
//! `engine::agents::AgentEngine::execute_agent_internal`'s timeout-race shape
//! around a single provider call.

use crate::error::{OrchestratorError, Result};
use crate::ids::{AgentId, ExecutionId};
use crate::schema::{SchemaDocument, SchemaValidator};
use crate::tool_client::{build_client, ToolClient, ToolServerRef};
use crate::workflow::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The three hooks a concrete agent supplies; mirrors this codebase's
/// trait-object pattern for pluggable backends (`FunctionStorage`,
/// `AgentStorage`).
#[async_trait]
pub trait AgentHooks: Send + Sync {
    async fn on_initialize(&self) -> Result<()>;
    async fn on_execute(&self, input: Value, context: Value, execution_id: ExecutionId) -> Result<Value>;
    async fn on_cleanup(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Initializing,
    Ready,
    Executing,
    Error,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_ms: Option<i64>,
    pub attempt: u32,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub state: AgentState,
    pub success_rate: f64,
    pub avg_duration_ms: i64,
    pub connected_tool_servers: Vec<String>,
}

/// Static authoring-time definition of an agent (§3 `AgentDefinition`).
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub id: AgentId,
    pub name: String,
    pub version: String,
    pub agent_type: String,
    pub input_schema: Option<SchemaDocument>,
    pub output_schema: Option<SchemaDocument>,
    pub mcp_servers: Vec<ToolServerRef>,
    pub timeout_ms: u64,
    pub retry_policy: RetryPolicy,
    pub dependencies: Vec<AgentId>,
}

impl AgentDefinition {
    pub fn new(
        id: impl Into<AgentId>,
        name: impl Into<String>,
        version: impl Into<String>,
        agent_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            agent_type: agent_type.into(),
            input_schema: None,
            output_schema: None,
            mcp_servers: Vec::new(),
            timeout_ms: 30_000,
            retry_policy: RetryPolicy::default(),
            dependencies: Vec::new(),
        }
    }
}

const DEFAULT_HISTORY_CAP: usize = 200;

/// Runtime instance of an [`AgentDefinition`]. Owns its tool clients and
/// execution history exclusively; the registry owns the `Agent` itself.
pub struct Agent {
    pub definition: AgentDefinition,
    hooks: Arc<dyn AgentHooks>,
    input_validator: Option<SchemaValidator>,
    output_validator: Option<SchemaValidator>,
    state: Mutex<AgentState>,
    tool_clients: Mutex<HashMap<String, Box<dyn ToolClient>>>,
    history: Mutex<VecDeque<ExecutionRecord>>,
}

impl Agent {
    pub fn new(definition: AgentDefinition, hooks: Arc<dyn AgentHooks>) -> Self {
        let input_validator = definition.input_schema.clone().map(SchemaValidator::compile);
        let output_validator = definition.output_schema.clone().map(SchemaValidator::compile);
        Self {
            definition,
            hooks,
            input_validator,
            output_validator,
            state: Mutex::new(AgentState::Idle),
            tool_clients: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(DEFAULT_HISTORY_CAP)),
        }
    }

    pub async fn state(&self) -> AgentState {
        *self.state.lock().await
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.definition.retry_policy
    }

    async fn set_state(&self, state: AgentState) {
        *self.state.lock().await = state;
    }

    /// Connects every declared tool server, in order. Each client is
    /// registered into `tool_clients` before `connect()` is called so a
    /// failed connect attempt still leaves something for cleanup to close.
    pub async fn initialize(&self) -> Result<()> {
        info!(agent_id = %self.definition.id, "initializing agent");
        self.set_state(AgentState::Initializing).await;

        if let Err(err) = self.hooks.on_initialize().await {
            self.set_state(AgentState::Error).await;
            return Err(err);
        }

        for server in &self.definition.mcp_servers {
            let client = build_client(server);
            self.tool_clients.lock().await.insert(server.name.clone(), client);
            let connected = {
                let clients = self.tool_clients.lock().await;
                let client = clients.get(&server.name).expect("just inserted above");
                client.connect().await
            };
            if let Err(err) = connected {
                self.close_tool_clients().await;
                self.set_state(AgentState::Error).await;
                return Err(err);
            }
        }

        self.set_state(AgentState::Ready).await;
        Ok(())
    }

    async fn close_tool_clients(&self) {
        let mut clients = self.tool_clients.lock().await;
        for (name, client) in clients.drain() {
            if let Err(err) = client.disconnect().await {
                warn!(tool = %name, error = %err, "tool client close failed during cleanup");
            }
        }
    }

    /// Validates input, runs `on_execute` under a timeout with attempt-bounded
    /// retry, validates output, and appends one [`ExecutionRecord`] covering
    /// every attempt. `retry_override` is the workflow step's own retry
    /// policy, if any; it takes precedence over `self.definition.retry_policy`.
    pub async fn execute(&self, input: Value, context: Value, retry_override: Option<RetryPolicy>) -> Result<Value> {
        {
            let state = self.state.lock().await;
            if *state != AgentState::Ready {
                return Err(OrchestratorError::State(format!(
                    "agent {} is not ready (state={:?})",
                    self.definition.id, *state
                )));
            }
        }

        // Schema-validation failures are a programming-contract violation,
        // not a transient fault: surfaced immediately, never retried.
        if let Some(validator) = &self.input_validator {
            validator.validate(&input)?;
        }

        self.set_state(AgentState::Executing).await;
        let execution_id = ExecutionId::new();
        let start_time = chrono::Utc::now();
        let policy = retry_override.unwrap_or(self.definition.retry_policy);
        let timeout = Duration::from_millis(self.definition.timeout_ms);
        let max_attempts = policy.max_retries.max(1);

        let mut attempt = 0u32;
        let mut last_error = None;
        let mut output = None;
        while attempt < max_attempts {
            attempt += 1;
            match tokio::time::timeout(timeout, self.hooks.on_execute(input.clone(), context.clone(), execution_id)).await {
                Ok(Ok(value)) => {
                    output = Some(value);
                    break;
                }
                Ok(Err(err)) => last_error = Some(err.to_string()),
                Err(_) => last_error = Some(format!("execution timed out after {timeout:?}")),
            }
            if attempt < max_attempts {
                tokio::time::sleep(policy.backoff_for(attempt)).await;
            }
        }

        // Output validation runs before the execution record is built, so a
        // schema-invalid output is recorded as the failure it actually is
        // instead of appearing as a successful execution.
        let outcome = match output {
            Some(value) => match &self.output_validator {
                Some(validator) => match validator.validate(&value) {
                    Ok(()) => Ok(value),
                    Err(err) => Err(err),
                },
                None => Ok(value),
            },
            None => Err(OrchestratorError::Transport(last_error.clone().unwrap_or_else(|| "agent execution failed".into()))),
        };

        let end_time = chrono::Utc::now();
        let duration_ms = (end_time - start_time).num_milliseconds();
        self.push_history(ExecutionRecord {
            execution_id,
            input,
            output: outcome.as_ref().ok().cloned(),
            error: outcome.as_ref().err().map(|err| err.to_string()),
            start_time,
            end_time: Some(end_time),
            duration_ms: Some(duration_ms),
            attempt,
            status: if outcome.is_ok() { ExecutionStatus::Success } else { ExecutionStatus::Error },
        })
        .await;

        self.set_state(if outcome.is_ok() { AgentState::Ready } else { AgentState::Error }).await;
        outcome
    }

    async fn push_history(&self, record: ExecutionRecord) {
        let mut history = self.history.lock().await;
        history.push_back(record);
        while history.len() > DEFAULT_HISTORY_CAP {
            history.pop_front();
        }
    }

    pub async fn cleanup(&self) -> Result<()> {
        info!(agent_id = %self.definition.id, "cleaning up agent");
        self.close_tool_clients().await;
        let hook_result = self.hooks.on_cleanup().await;
        self.set_state(AgentState::Stopped).await;
        hook_result
    }

    pub async fn status(&self) -> AgentStatus {
        let history = self.history.lock().await;
        let total = history.len();
        let successes = history.iter().filter(|r| r.status == ExecutionStatus::Success).count();
        let success_rate = if total == 0 { 1.0 } else { successes as f64 / total as f64 };
        let avg_duration_ms = if total == 0 {
            0
        } else {
            history.iter().filter_map(|r| r.duration_ms).sum::<i64>() / total as i64
        };
        AgentStatus {
            state: *self.state.lock().await,
            success_rate,
            avg_duration_ms,
            connected_tool_servers: self.tool_clients.lock().await.keys().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHooks;

    #[async_trait]
    impl AgentHooks for EchoHooks {
        async fn on_initialize(&self) -> Result<()> {
            Ok(())
        }
        async fn on_execute(&self, input: Value, _context: Value, _execution_id: ExecutionId) -> Result<Value> {
            Ok(input)
        }
        async fn on_cleanup(&self) -> Result<()> {
            Ok(())
        }
    }

    struct AlwaysFailsHooks;

    #[async_trait]
    impl AgentHooks for AlwaysFailsHooks {
        async fn on_initialize(&self) -> Result<()> {
            Ok(())
        }
        async fn on_execute(&self, _input: Value, _context: Value, _execution_id: ExecutionId) -> Result<Value> {
            Err(OrchestratorError::Transport("nope".into()))
        }
        async fn on_cleanup(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn lifecycle_moves_idle_to_ready_to_stopped() {
        let agent = Agent::new(AgentDefinition::new("a", "a", "1.0.0", "task"), Arc::new(EchoHooks));
        assert_eq!(agent.state().await, AgentState::Idle);
        agent.initialize().await.unwrap();
        assert_eq!(agent.state().await, AgentState::Ready);
        agent.execute(json!({"x": 1}), json!({}), None).await.unwrap();
        assert_eq!(agent.state().await, AgentState::Ready);
        agent.cleanup().await.unwrap();
        assert_eq!(agent.state().await, AgentState::Stopped);
    }

    #[tokio::test]
    async fn execute_before_ready_fails_with_state_error() {
        let agent = Agent::new(AgentDefinition::new("a", "a", "1.0.0", "task"), Arc::new(EchoHooks));
        let err = agent.execute(json!({}), json!({}), None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::State(_)));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_final_error_and_record_history() {
        let mut def = AgentDefinition::new("a", "a", "1.0.0", "task");
        def.retry_policy = RetryPolicy { max_retries: 2, base_backoff_ms: 0 };
        let agent = Agent::new(def, Arc::new(AlwaysFailsHooks));
        agent.initialize().await.unwrap();
        let err = agent.execute(json!({}), json!({}), None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Transport(_)));
        assert_eq!(agent.state().await, AgentState::Error);
    }

    #[tokio::test]
    async fn input_validation_failure_is_never_retried() {
        let mut def = AgentDefinition::new("a", "a", "1.0.0", "task");
        def.input_schema = Some(SchemaDocument::object([], ["required_field"]));
        def.retry_policy = RetryPolicy { max_retries: 5, base_backoff_ms: 0 };
        let agent = Agent::new(def, Arc::new(EchoHooks));
        agent.initialize().await.unwrap();
        let err = agent.execute(json!({}), json!({}), None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[tokio::test]
    async fn output_validation_failure_records_an_error_entry_not_a_success() {
        let mut def = AgentDefinition::new("a", "a", "1.0.0", "task");
        def.output_schema = Some(SchemaDocument::object([], ["required_field"]));
        let agent = Agent::new(def, Arc::new(EchoHooks));
        agent.initialize().await.unwrap();

        // EchoHooks returns the input verbatim, which has no `required_field`,
        // so `on_execute` succeeds but output validation fails.
        let err = agent.execute(json!({}), json!({}), None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert_eq!(agent.state().await, AgentState::Error);

        let status = agent.status().await;
        assert_eq!(status.success_rate, 0.0, "the invalid-output attempt must not count as a success");
    }
}
