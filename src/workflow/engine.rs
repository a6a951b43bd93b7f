//! Workflow execution: topological ordering, per-step dependency/condition
//! checks, input resolution, attempt-bounded retry, and output aggregation
//! (§4.7).
//!
//! Grounded on `models::workflow::WorkflowDefinition::find_unreachable_states()`'s
//! graph-traversal pattern (adapted into [`crate::topo::topological_sort`])
//! and `engine::functions::calculate_retry_delay`/`process_function_chains`
//! for the step-level retry/backoff shape.

use crate::error::{OrchestratorError, Result};
use crate::ids::{StepId, WorkflowExecutionId, WorkflowId};
use crate::runtime::registry::AgentRegistry;
use crate::topo::topological_sort;
use crate::workflow::condition::Condition;
use crate::workflow::reference;
use crate::workflow::{
    ErrorStrategy, StepResult, StepStatus, WorkflowDefinition, WorkflowExecution, WorkflowStatus,
};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Plain serializable snapshot returned by [`WorkflowEngine::metrics`] (§4.9);
/// no external metrics-exporter dependency, consistent with the enhanced
/// bus's own `Metrics` struct.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct WorkflowMetrics {
    pub workflows_registered: usize,
    pub executions_started: u64,
    pub executions_completed: u64,
    pub executions_failed: u64,
}

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    WorkflowStart { execution_id: WorkflowExecutionId, workflow_id: WorkflowId },
    WorkflowComplete { execution_id: WorkflowExecutionId },
    WorkflowError { execution_id: WorkflowExecutionId, error: String },
    StepStart { execution_id: WorkflowExecutionId, step_id: StepId },
    StepComplete { execution_id: WorkflowExecutionId, step_id: StepId },
    StepError { execution_id: WorkflowExecutionId, step_id: StepId, error: String },
    StepSkipped { execution_id: WorkflowExecutionId, step_id: StepId },
}

pub struct WorkflowEngine {
    registry: Arc<AgentRegistry>,
    definitions: DashMap<WorkflowId, WorkflowDefinition>,
    compiled_conditions: DashMap<(WorkflowId, StepId), Condition>,
    executions: DashMap<WorkflowExecutionId, WorkflowExecution>,
    events: broadcast::Sender<WorkflowEvent>,
    executions_started: AtomicU64,
    executions_completed: AtomicU64,
    executions_failed: AtomicU64,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            registry,
            definitions: DashMap::new(),
            compiled_conditions: DashMap::new(),
            executions: DashMap::new(),
            events,
            executions_started: AtomicU64::new(0),
            executions_completed: AtomicU64::new(0),
            executions_failed: AtomicU64::new(0),
        }
    }

    pub fn metrics(&self) -> WorkflowMetrics {
        WorkflowMetrics {
            workflows_registered: self.definitions.len(),
            executions_started: self.executions_started.load(Ordering::Relaxed),
            executions_completed: self.executions_completed.load(Ordering::Relaxed),
            executions_failed: self.executions_failed.load(Ordering::Relaxed),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: WorkflowEvent) {
        debug!(?event, "workflow event");
        let _ = self.events.send(event);
    }

    /// Validates that every step's `agentId` is registered, compiles every
    /// step `condition` once, then stores the definition. Conditions are
    /// never re-parsed at execution time (§9 "Dynamic reference expressions
    /// → compiled AST").
    pub fn register_workflow(&self, definition: WorkflowDefinition) -> Result<()> {
        for step in &definition.steps {
            if !self.registry.has(&step.agent_id) {
                return Err(OrchestratorError::NotFound(format!(
                    "workflow {} references unregistered agent {}",
                    definition.id, step.agent_id
                )));
            }
        }

        let mut compiled = Vec::with_capacity(definition.steps.len());
        for step in &definition.steps {
            if let Some(source) = &step.condition {
                compiled.push(((definition.id.clone(), step.id.clone()), Condition::compile(source)?));
            }
        }

        info!(workflow_id = %definition.id, steps = definition.steps.len(), "registering workflow");
        for (key, condition) in compiled {
            self.compiled_conditions.insert(key, condition);
        }
        self.definitions.insert(definition.id.clone(), definition);
        Ok(())
    }

    pub fn get_execution(&self, id: &WorkflowExecutionId) -> Option<WorkflowExecution> {
        self.executions.get(id).map(|e| e.clone())
    }

    pub fn list_executions(&self, workflow_id: Option<&WorkflowId>) -> Vec<WorkflowExecution> {
        self.executions
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|e| workflow_id.map(|w| &e.workflow_id == w).unwrap_or(true))
            .collect()
    }

    pub async fn execute(&self, workflow_id: &WorkflowId, initial_inputs: Value) -> Result<WorkflowExecution> {
        let definition = self
            .definitions
            .get(workflow_id)
            .map(|d| d.clone())
            .ok_or_else(|| OrchestratorError::NotFound(format!("workflow {workflow_id}")))?;

        let step_ids: Vec<StepId> = definition.steps.iter().map(|s| s.id.clone()).collect();
        // Cycle detection happens before any step runs or is recorded (invariant 3).
        let order = topological_sort(&step_ids, |id| {
            definition.find_step(id).map(|s| s.depends_on.clone()).unwrap_or_default()
        })?;

        let mut execution = WorkflowExecution::start(definition.id.clone());
        self.executions_started.fetch_add(1, Ordering::Relaxed);
        self.emit(WorkflowEvent::WorkflowStart {
            execution_id: execution.execution_id,
            workflow_id: definition.id.clone(),
        });

        let mut step_outputs: HashMap<StepId, Value> = HashMap::new();
        let mut failed = false;

        for step_id in &order {
            let step = definition.find_step(step_id).expect("order is drawn from definition.steps");
            self.emit(WorkflowEvent::StepStart { execution_id: execution.execution_id, step_id: step_id.clone() });

            if let Some(condition) = self.compiled_conditions.get(&(definition.id.clone(), step_id.clone())) {
                if !condition.evaluate(&initial_inputs, &step_outputs) {
                    execution.step_results.insert(
                        step_id.clone(),
                        StepResult { status: StepStatus::Skipped, output: None, error: None, timestamp: Utc::now() },
                    );
                    self.emit(WorkflowEvent::StepSkipped { execution_id: execution.execution_id, step_id: step_id.clone() });
                    continue;
                }
            }

            // A step depending on a failed or skipped step is itself failed;
            // preserved as specified (see DESIGN.md Open Question decisions).
            let dependency_satisfied = step.depends_on.iter().all(|dep| {
                matches!(execution.step_results.get(dep).map(|r| r.status), Some(StepStatus::Success))
            });
            if !dependency_satisfied {
                if self.fail_step(&definition, &mut execution, step_id, "dependency not satisfied".to_string()) {
                    failed = true;
                    break;
                }
                continue;
            }

            let resolved_inputs = reference::resolve_map(&step.inputs, &initial_inputs, &step_outputs);
            let input_value = Value::Object(resolved_inputs.into_iter().collect());

            let agent = match self.registry.get(&step.agent_id) {
                Some(agent) => agent,
                None => {
                    if self.fail_step(
                        &definition,
                        &mut execution,
                        step_id,
                        format!("agent {} is no longer registered", step.agent_id),
                    ) {
                        failed = true;
                        break;
                    }
                    continue;
                }
            };

            let context = json!({"workflowExecutionId": execution.execution_id.to_string(), "stepId": step_id.to_string()});

            // Step-level `retry` overrides the agent's own default; the
            // attempt-bounded retry loop lives in `Agent::execute` itself so
            // there is exactly one retry mechanism per call, not two stacked
            // loops.
            match agent.execute(input_value.clone(), context, step.retry).await {
                Ok(value) => {
                    execution.step_results.insert(
                        step_id.clone(),
                        StepResult { status: StepStatus::Success, output: Some(value.clone()), error: None, timestamp: Utc::now() },
                    );
                    step_outputs.insert(step_id.clone(), value);
                    self.emit(WorkflowEvent::StepComplete { execution_id: execution.execution_id, step_id: step_id.clone() });
                }
                Err(err) => {
                    if self.fail_step(&definition, &mut execution, step_id, err.to_string()) {
                        failed = true;
                        break;
                    }
                }
            }
        }

        if failed {
            execution.finish(WorkflowStatus::Failed);
            self.executions_failed.fetch_add(1, Ordering::Relaxed);
            self.emit(WorkflowEvent::WorkflowError {
                execution_id: execution.execution_id,
                error: execution.errors.last().map(|(_, e)| e.clone()).unwrap_or_default(),
            });
        } else {
            for (name, expr) in &definition.outputs {
                let value = reference::resolve(&Value::String(expr.clone()), &initial_inputs, &step_outputs);
                execution.outputs.insert(name.clone(), value);
            }
            execution.finish(WorkflowStatus::Completed);
            self.executions_completed.fetch_add(1, Ordering::Relaxed);
            self.emit(WorkflowEvent::WorkflowComplete { execution_id: execution.execution_id });
        }

        self.executions.insert(execution.execution_id, execution.clone());
        Ok(execution)
    }

    /// Records a failure for `step_id`, applies the step's (or workflow's
    /// default) error strategy, and returns `true` if the whole workflow
    /// must stop.
    fn fail_step(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
        step_id: &StepId,
        error: String,
    ) -> bool {
        execution.step_results.insert(
            step_id.clone(),
            StepResult { status: StepStatus::Failed, output: None, error: Some(error.clone()), timestamp: Utc::now() },
        );
        execution.errors.push((step_id.clone(), error.clone()));
        self.emit(WorkflowEvent::StepError { execution_id: execution.execution_id, step_id: step_id.clone(), error });

        let step = definition.find_step(step_id);
        let strategy = step.and_then(|s| s.on_error).unwrap_or(definition.error_strategy);
        match strategy {
            ErrorStrategy::Continue => false,
            ErrorStrategy::Stop | ErrorStrategy::Retry => {
                // `retry` is identical to `stop` here: the step-level retry
                // budget is already exhausted by the time a step fails.
                if strategy == ErrorStrategy::Retry {
                    warn!(step_id = %step_id, "onError=retry exhausted at step layer, stopping workflow");
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::agent::{Agent, AgentDefinition};
    use crate::workflow::{RetryPolicy, WorkflowStep};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoHooks;

    #[async_trait]
    impl crate::runtime::agent::AgentHooks for EchoHooks {
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

    struct FlakyHooks {
        calls: AtomicU32,
    }

    #[async_trait]
    impl crate::runtime::agent::AgentHooks for FlakyHooks {
        async fn on_initialize(&self) -> Result<()> {
            Ok(())
        }
        async fn on_execute(&self, input: Value, _context: Value, _execution_id: crate::ids::ExecutionId) -> Result<Value> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(OrchestratorError::Transport("transient".into()));
            }
            Ok(input)
        }
        async fn on_cleanup(&self) -> Result<()> {
            Ok(())
        }
    }

    fn registry_with(agents: Vec<Agent>) -> Arc<AgentRegistry> {
        let registry = Arc::new(AgentRegistry::new());
        for agent in agents {
            registry.register(agent).unwrap();
        }
        registry
    }

    fn echo_agent(id: &str) -> Agent {
        Agent::new(AgentDefinition::new(id, id, "1.0.0", "task"), Arc::new(EchoHooks))
    }

    #[tokio::test]
    async fn happy_path_three_step_workflow() {
        let registry = registry_with(vec![echo_agent("extract"), echo_agent("analyze"), echo_agent("estimate")]);
        for agent in [registry.get(&"extract".into()).unwrap(), registry.get(&"analyze".into()).unwrap(), registry.get(&"estimate".into()).unwrap()] {
            agent.initialize().await.unwrap();
        }

        let definition = WorkflowDefinition::new("w1", "demo", "1.0.0")
            .step(WorkflowStep::new("extract", "extract").input("request", json!("$input.userRequest")))
            .step(WorkflowStep::new("analyze", "analyze").depends_on("extract").input("data", json!("$steps.extract.request")))
            .step(WorkflowStep::new("estimate", "estimate").depends_on("analyze").input("data", json!("$steps.analyze.data")))
            .output("final", "$steps.estimate.data");

        let engine = WorkflowEngine::new(registry);
        engine.register_workflow(definition).unwrap();
        let execution = engine.execute(&"w1".into(), json!({"userRequest": "Deploy X"})).await.unwrap();

        assert_eq!(execution.status, WorkflowStatus::Completed);
        assert_eq!(execution.step_results.len(), 3);
        assert_eq!(execution.outputs["final"], json!("Deploy X"));
    }

    #[tokio::test]
    async fn dependency_failure_stops_the_workflow() {
        struct FailingHooks;
        #[async_trait]
        impl crate::runtime::agent::AgentHooks for FailingHooks {
            async fn on_initialize(&self) -> Result<()> {
                Ok(())
            }
            async fn on_execute(&self, _input: Value, _context: Value, _execution_id: crate::ids::ExecutionId) -> Result<Value> {
                Err(OrchestratorError::Transport("boom".into()))
            }
            async fn on_cleanup(&self) -> Result<()> {
                Ok(())
            }
        }

        let mut a_def = AgentDefinition::new("a", "a", "1.0.0", "task");
        a_def.retry_policy = RetryPolicy { max_retries: 1, base_backoff_ms: 0 };
        let a = Agent::new(a_def, Arc::new(FailingHooks));
        let b = echo_agent("b");
        let registry = registry_with(vec![a, b]);
        for agent in [registry.get(&"a".into()).unwrap(), registry.get(&"b".into()).unwrap()] {
            agent.initialize().await.unwrap();
        }

        let definition = WorkflowDefinition::new("w2", "demo", "1.0.0")
            .step(WorkflowStep::new("a", "a"))
            .step(WorkflowStep::new("b", "b").depends_on("a"));

        let engine = WorkflowEngine::new(registry);
        engine.register_workflow(definition).unwrap();
        let execution = engine.execute(&"w2".into(), json!({})).await.unwrap();

        assert_eq!(execution.status, WorkflowStatus::Failed);
        assert_eq!(execution.step_results.get(&StepId::new("a")).unwrap().status, StepStatus::Failed);
        assert!(!execution.step_results.contains_key(&StepId::new("b")));
        assert_eq!(execution.errors.len(), 1);
    }

    #[tokio::test]
    async fn condition_skips_step_and_downstream_fails() {
        let registry = registry_with(vec![echo_agent("a"), echo_agent("b"), echo_agent("c")]);
        for agent in [registry.get(&"a".into()).unwrap(), registry.get(&"b".into()).unwrap(), registry.get(&"c".into()).unwrap()] {
            agent.initialize().await.unwrap();
        }

        let definition = WorkflowDefinition::new("w3", "demo", "1.0.0")
            .step(WorkflowStep::new("a", "a").input("shouldRun", json!(false)))
            .step(WorkflowStep::new("b", "b").depends_on("a").condition("$steps.a.output.shouldRun == true"))
            .step(WorkflowStep::new("c", "c").depends_on("b"));

        let engine = WorkflowEngine::new(registry);
        engine.register_workflow(definition).unwrap();
        let execution = engine.execute(&"w3".into(), json!({})).await.unwrap();

        assert_eq!(execution.step_results.get(&StepId::new("b")).unwrap().status, StepStatus::Skipped);
        assert_eq!(execution.step_results.get(&StepId::new("c")).unwrap().status, StepStatus::Failed);
        assert_eq!(execution.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn retry_then_success() {
        let flaky = Agent::new(AgentDefinition::new("flaky", "flaky", "1.0.0", "task"), Arc::new(FlakyHooks { calls: AtomicU32::new(0) }));
        let registry = registry_with(vec![flaky]);
        let agent = registry.get(&"flaky".into()).unwrap();
        agent.initialize().await.unwrap();

        let definition = WorkflowDefinition::new("w4", "demo", "1.0.0").step(
            WorkflowStep::new("flakyStep", "flaky").input("x", json!(1)).retry_override(RetryPolicy { max_retries: 2, base_backoff_ms: 1 }),
        );

        let engine = WorkflowEngine::new(registry);
        engine.register_workflow(definition).unwrap();
        let execution = engine.execute(&"w4".into(), json!({})).await.unwrap();

        assert_eq!(execution.step_results.get(&StepId::new("flakyStep")).unwrap().status, StepStatus::Success);
    }
}
