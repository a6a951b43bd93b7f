//! Workflow engine: declarative DAG-scheduled step execution over
//! registered agents (§3, §4.7).
//!
//! Grounded on `models::workflow::WorkflowDefinition`'s entity shape
//! (id/name/version/steps), adapted from its place-and-transition Petri-net
//! model to a directed step graph keyed by `dependsOn`.

pub mod condition;
pub mod engine;
pub mod phases;
pub mod reference;

pub use engine::{WorkflowEngine, WorkflowEvent, WorkflowMetrics};

use crate::ids::{AgentId, StepId, WorkflowExecutionId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Retry policy shared by `AgentDefinition.retryPolicy` and
/// `WorkflowStep.retry` (a step-level override of the agent's default).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_retries: 1, base_backoff_ms: 0 }
    }

    pub fn backoff_for(&self, attempt: u32) -> std::time::Duration {
        std::time::Duration::from_millis(self.base_backoff_ms * 2u64.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_backoff_ms: 500 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    Stop,
    Continue,
    Retry,
}

impl Default for ErrorStrategy {
    fn default() -> Self {
        ErrorStrategy::Stop
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowStep {
    pub id: StepId,
    pub agent_id: AgentId,
    pub inputs: HashMap<String, Value>,
    pub depends_on: Vec<StepId>,
    pub condition: Option<String>,
    pub retry: Option<RetryPolicy>,
    pub on_error: Option<ErrorStrategy>,
}

impl WorkflowStep {
    pub fn new(id: impl Into<StepId>, agent_id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            inputs: HashMap::new(),
            depends_on: Vec::new(),
            condition: None,
            retry: None,
            on_error: None,
        }
    }

    pub fn input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    pub fn depends_on(mut self, step: impl Into<StepId>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    pub fn condition(mut self, expr: impl Into<String>) -> Self {
        self.condition = Some(expr.into());
        self
    }

    pub fn retry_override(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn on_error(mut self, strategy: ErrorStrategy) -> Self {
        self.on_error = Some(strategy);
        self
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub version: String,
    pub steps: Vec<WorkflowStep>,
    /// External output name -> reference expression against `stepResults`.
    pub outputs: HashMap<String, String>,
    pub error_strategy: ErrorStrategy,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<WorkflowId>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            steps: Vec::new(),
            outputs: HashMap::new(),
            error_strategy: ErrorStrategy::default(),
        }
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn output(mut self, name: impl Into<String>, reference: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), reference.into());
        self
    }

    fn find_step(&self, id: &StepId) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| &s.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: WorkflowExecutionId,
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub step_results: HashMap<StepId, StepResult>,
    pub outputs: HashMap<String, Value>,
    pub errors: Vec<(StepId, String)>,
}

impl WorkflowExecution {
    fn start(workflow_id: WorkflowId) -> Self {
        Self {
            execution_id: WorkflowExecutionId::new(),
            workflow_id,
            status: WorkflowStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            step_results: HashMap::new(),
            outputs: HashMap::new(),
            errors: Vec::new(),
        }
    }

    fn finish(&mut self, status: WorkflowStatus) {
        let end_time = Utc::now();
        self.duration_ms = Some((end_time - self.start_time).num_milliseconds());
        self.end_time = Some(end_time);
        self.status = status;
    }
}
