//! Workflow execution engine: validates a [`Workflow`] into a DAG, computes
//! its level plan once, and executes level by level with per-step guards,
//! retries, and `on_success`/`on_failure` branching. Cancellation is
//! cooperative via [`CancellationToken`], threaded through as an ambient
//! signal like every other long-running operation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::cancel::CancellationToken;
use crate::error::{RagoError, Result};
use crate::store::Database;

use super::dag::Dag;
use super::{
    ComparisonOp, Execution, ExecutionContext, ExecutionStatus, Guard, RetryPolicy, Step,
    StepResult, StepStatus, Workflow,
};

/// Executes a single step's action against its context. Pluggable so the
/// engine is testable without a real tool/LLM backend.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &Step, context: &ExecutionContext) -> Result<serde_json::Value>;
}

/// Engine-wide defaults, mirroring `WorkflowEngineConfig` in `config.rs`.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub default_timeout: Duration,
    pub enable_parallelism: bool,
    pub default_retry_policy: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(60),
            enable_parallelism: true,
            default_retry_policy: RetryPolicy::default(),
        }
    }
}

/// Validates a workflow's step graph and runs executions against it.
pub struct Engine {
    config: EngineConfig,
}

fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Persists an execution's current state to `db`. Failures are logged, not
/// propagated: storage is durability, not a precondition of the execution
/// having run.
fn persist(db: &Database, execution: &Execution) {
    let record = match serde_json::to_string(execution) {
        Ok(record) => record,
        Err(err) => {
            warn!(error = %err, execution_id = %execution.id, "failed to serialize execution");
            return;
        }
    };
    let created_at = execution
        .started_at
        .unwrap_or_else(Utc::now)
        .to_rfc3339();
    let updated_at = execution.ended_at.unwrap_or_else(Utc::now).to_rfc3339();
    if let Err(err) = db.put_execution(&execution.id, &execution.workflow_id, &record, &created_at, &updated_at) {
        warn!(error = %err, execution_id = %execution.id, "failed to persist execution");
    }
}

fn evaluate_guard(guard: &Guard, context: &ExecutionContext) -> bool {
    match guard {
        Guard::Simple { field, op, value } => {
            let actual = context
                .get(field)
                .map(canonicalize)
                .unwrap_or_default();
            op.evaluate(&actual, value)
        }
        // No evaluator is wired into the core engine; an expression guard
        // without an external collaborator is treated as satisfied, so the
        // step still runs rather than silently disappearing.
        Guard::Expression(_) => true,
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Validates non-empty step list, unique ids, known/non-self
    /// dependencies, and acyclicity.
    pub fn validate(&self, workflow: &Workflow) -> Result<Dag<()>> {
        if workflow.steps.is_empty() {
            return Err(RagoError::InvalidWorkflow("workflow has no steps".to_string()));
        }

        let mut seen = HashSet::new();
        for step in &workflow.steps {
            if !seen.insert(step.id.clone()) {
                return Err(RagoError::InvalidWorkflow(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }

        let mut dag: Dag<()> = Dag::new();
        for step in &workflow.steps {
            dag.add_node(step.id.clone(), ());
        }
        for step in &workflow.steps {
            for dep in &step.dependencies {
                if dep == &step.id {
                    return Err(RagoError::InvalidWorkflow(format!(
                        "step '{}' depends on itself",
                        step.id
                    )));
                }
                if !dag.contains(dep) {
                    return Err(RagoError::InvalidWorkflow(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        step.id
                    )));
                }
                dag.add_edge(dep, &step.id)?;
            }
        }

        if dag.has_cycle() {
            return Err(RagoError::InvalidWorkflow(
                "workflow graph contains a cycle".to_string(),
            ));
        }

        Ok(dag)
    }

    /// Runs a workflow to completion (or first-level failure, or
    /// cancellation), persisting the final `Execution` to `db`.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        input: HashMap<String, serde_json::Value>,
        executor: Arc<dyn StepExecutor>,
        cancellation: CancellationToken,
        db: &Database,
    ) -> Result<Execution> {
        let dag = self.validate(workflow)?;
        let levels = dag.execution_levels()?;

        let execution_id = uuid::Uuid::new_v4().to_string();
        let mut execution = Execution::new(execution_id, workflow, input);
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());

        let steps_by_id: HashMap<&str, &Step> =
            workflow.steps.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut executed: HashSet<String> = HashSet::new();
        let mut level_failed = false;

        'levels: for level in &levels {
            if cancellation.is_cancelled() {
                execution.status = ExecutionStatus::Cancelled;
                execution.ended_at = Some(Utc::now());
                persist(db, &execution);
                return Ok(execution);
            }

            let mut outcomes: Vec<(String, StepResult)> = Vec::new();
            if self.config.enable_parallelism {
                let futures = level.iter().map(|id| {
                    let step = steps_by_id[id.as_str()];
                    self.run_step(step, &execution.context, executor.clone(), cancellation.clone())
                });
                let results = futures::future::join_all(futures).await;
                for (id, result) in level.iter().zip(results.into_iter()) {
                    outcomes.push((id.clone(), result));
                }
            } else {
                let mut ordered = level.clone();
                ordered.sort();
                for id in &ordered {
                    let step = steps_by_id[id.as_str()];
                    let result = self
                        .run_step(step, &execution.context, executor.clone(), cancellation.clone())
                        .await;
                    outcomes.push((id.clone(), result));
                }
            }

            for (id, result) in outcomes {
                let step = steps_by_id[id.as_str()];
                let failed = result.status == StepStatus::Failed;
                execution.step_results.insert(id.clone(), result.clone());
                executed.insert(id.clone());

                let follow_ups = if failed { &step.on_failure } else { &step.on_success };
                for follow_up_id in follow_ups {
                    if executed.contains(follow_up_id) {
                        continue;
                    }
                    if let Some(follow_up_step) = steps_by_id.get(follow_up_id.as_str()) {
                        let follow_result = self
                            .run_step(
                                follow_up_step,
                                &execution.context,
                                executor.clone(),
                                cancellation.clone(),
                            )
                            .await;
                        executed.insert(follow_up_id.clone());
                        execution
                            .step_results
                            .insert(follow_up_id.clone(), follow_result);
                    }
                }

                if failed {
                    level_failed = true;
                }
            }

            if level_failed {
                break 'levels;
            }
        }

        execution.ended_at = Some(Utc::now());
        execution.status = if level_failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Success
        };
        persist(db, &execution);
        Ok(execution)
    }

    async fn run_step(
        &self,
        step: &Step,
        context: &ExecutionContext,
        executor: Arc<dyn StepExecutor>,
        cancellation: CancellationToken,
    ) -> StepResult {
        if let Some(guard) = &step.guard {
            if !evaluate_guard(guard, context) {
                return StepResult {
                    status: StepStatus::Skipped,
                    started_at: Some(Utc::now()),
                    ended_at: Some(Utc::now()),
                    output: None,
                    error: None,
                    retry_count: 0,
                };
            }
        }

        let policy = step.retry_policy.unwrap_or(self.config.default_retry_policy);
        let timeout = step.timeout.unwrap_or(self.config.default_timeout);
        let started_at = Utc::now();

        let mut attempt = 0u32;
        let mut delay = policy.retry_delay;
        loop {
            attempt += 1;
            if cancellation.is_cancelled() {
                return StepResult {
                    status: StepStatus::Cancelled,
                    started_at: Some(started_at),
                    ended_at: Some(Utc::now()),
                    output: None,
                    error: Some("cancelled".to_string()),
                    retry_count: attempt - 1,
                };
            }

            let call = executor.execute(step, context);
            let outcome = tokio::select! {
                result = tokio::time::timeout(timeout, call) => result
                    .map_err(|_| RagoError::Timeout(format!("step '{}' exceeded {:?}", step.id, timeout))),
                _ = cancellation.cancelled() => Err(RagoError::Cancelled(format!("step '{}' cancelled", step.id))),
            };

            match outcome {
                Ok(Ok(output)) => {
                    return StepResult {
                        status: StepStatus::Succeeded,
                        started_at: Some(started_at),
                        ended_at: Some(Utc::now()),
                        output: Some(output),
                        error: None,
                        retry_count: attempt - 1,
                    };
                }
                Ok(Err(err)) if attempt <= policy.max_retries && err.is_retryable() => {
                    warn!(step = %step.id, attempt, error = %err, "step failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = Duration::from_secs_f64(delay.as_secs_f64() * policy.backoff_factor);
                }
                Ok(Err(err)) => {
                    return StepResult {
                        status: StepStatus::Failed,
                        started_at: Some(started_at),
                        ended_at: Some(Utc::now()),
                        output: None,
                        error: Some(err.to_string()),
                        retry_count: attempt - 1,
                    };
                }
                Err(err) => {
                    let status = if matches!(err, RagoError::Cancelled(_)) {
                        StepStatus::Cancelled
                    } else {
                        StepStatus::Failed
                    };
                    return StepResult {
                        status,
                        started_at: Some(started_at),
                        ended_at: Some(Utc::now()),
                        output: None,
                        error: Some(err.to_string()),
                        retry_count: attempt - 1,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StepType;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    struct RecordingExecutor {
        levels_seen: Mutex<HashMap<String, u32>>,
        level_counter: AtomicU32,
    }

    impl RecordingExecutor {
        fn new() -> Self {
            Self {
                levels_seen: Mutex::new(HashMap::new()),
                level_counter: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl StepExecutor for RecordingExecutor {
        async fn execute(&self, step: &Step, _context: &ExecutionContext) -> Result<Value> {
            self.levels_seen
                .lock()
                .unwrap()
                .insert(step.id.clone(), self.level_counter.load(Ordering::SeqCst));
            Ok(json!({"step": step.id}))
        }
    }

    fn workflow_with(steps: Vec<Step>) -> Workflow {
        Workflow {
            id: "wf".to_string(),
            name: "wf".to_string(),
            version: 1,
            steps,
            triggers: Vec::new(),
            variables: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn empty_step_list_is_invalid() {
        let engine = Engine::new(EngineConfig::default());
        let err = engine.validate(&workflow_with(Vec::new())).unwrap_err();
        assert!(matches!(err, RagoError::InvalidWorkflow(_)));
    }

    #[test]
    fn self_dependency_is_invalid() {
        let mut step = Step::new("a", StepType::Action);
        step.dependencies = vec!["a".to_string()];
        let engine = Engine::new(EngineConfig::default());
        let err = engine.validate(&workflow_with(vec![step])).unwrap_err();
        assert!(matches!(err, RagoError::InvalidWorkflow(_)));
    }

    #[test]
    fn duplicate_step_ids_are_invalid() {
        let engine = Engine::new(EngineConfig::default());
        let workflow = workflow_with(vec![Step::new("a", StepType::Action), Step::new("a", StepType::Action)]);
        let err = engine.validate(&workflow).unwrap_err();
        assert!(matches!(err, RagoError::InvalidWorkflow(_)));
    }

    #[tokio::test]
    async fn diamond_dependency_executes_in_three_levels() {
        let mut b = Step::new("b", StepType::Action);
        b.dependencies = vec!["a".to_string()];
        let mut c = Step::new("c", StepType::Action);
        c.dependencies = vec!["a".to_string()];
        let mut d = Step::new("d", StepType::Action);
        d.dependencies = vec!["b".to_string(), "c".to_string()];
        let workflow = workflow_with(vec![Step::new("a", StepType::Action), b, c, d]);

        let engine = Engine::new(EngineConfig::default());
        let executor = Arc::new(RecordingExecutor::new());
        let db = test_db();
        let execution = engine
            .execute(&workflow, HashMap::new(), executor, CancellationToken::new(), &db)
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Success);
        for id in ["a", "b", "c", "d"] {
            assert_eq!(execution.step_results[id].status, StepStatus::Succeeded);
        }
    }

    #[tokio::test]
    async fn failing_step_stops_later_levels() {
        struct FailingExecutor;
        #[async_trait]
        impl StepExecutor for FailingExecutor {
            async fn execute(&self, step: &Step, _context: &ExecutionContext) -> Result<Value> {
                if step.id == "a" {
                    Err(RagoError::InvalidInput("bad config".to_string()))
                } else {
                    Ok(json!({}))
                }
            }
        }
        let mut b = Step::new("b", StepType::Action);
        b.dependencies = vec!["a".to_string()];
        let workflow = workflow_with(vec![Step::new("a", StepType::Action), b]);

        let engine = Engine::new(EngineConfig::default());
        let db = test_db();
        let execution = engine
            .execute(
                &workflow,
                HashMap::new(),
                Arc::new(FailingExecutor),
                CancellationToken::new(),
                &db,
            )
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.step_results["a"].status, StepStatus::Failed);
        assert_eq!(execution.step_results["b"].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn failing_guard_skips_step_and_is_treated_as_success_for_dependents() {
        let mut gated = Step::new("gated", StepType::Action);
        gated.guard = Some(Guard::Simple {
            field: "run".to_string(),
            op: ComparisonOp::Eq,
            value: "yes".to_string(),
        });
        let mut dependent = Step::new("dependent", StepType::Action);
        dependent.dependencies = vec!["gated".to_string()];
        let workflow = workflow_with(vec![gated, dependent]);

        let engine = Engine::new(EngineConfig::default());
        let executor = Arc::new(RecordingExecutor::new());
        let db = test_db();
        let execution = engine
            .execute(&workflow, HashMap::new(), executor, CancellationToken::new(), &db)
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.step_results["gated"].status, StepStatus::Skipped);
        assert_eq!(execution.step_results["dependent"].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn cancelled_before_start_yields_cancelled_execution() {
        let workflow = workflow_with(vec![Step::new("a", StepType::Action)]);
        let engine = Engine::new(EngineConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        let db = test_db();
        let execution = engine
            .execute(&workflow, HashMap::new(), Arc::new(RecordingExecutor::new()), token, &db)
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn retry_then_succeed_ends_with_two_retries_recorded() {
        struct FlakyExecutor {
            attempts: AtomicU32,
        }

        #[async_trait]
        impl StepExecutor for FlakyExecutor {
            async fn execute(&self, _step: &Step, _context: &ExecutionContext) -> Result<Value> {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    Err(RagoError::Llm("transient upstream failure".to_string()))
                } else {
                    Ok(json!({"attempt": attempt}))
                }
            }
        }

        let mut step = Step::new("x", StepType::Action);
        step.retry_policy = Some(RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
            backoff_factor: 1.0,
        });
        let workflow = workflow_with(vec![step]);

        let engine = Engine::new(EngineConfig::default());
        let db = test_db();
        let execution = engine
            .execute(
                &workflow,
                HashMap::new(),
                Arc::new(FlakyExecutor {
                    attempts: AtomicU32::new(0),
                }),
                CancellationToken::new(),
                &db,
            )
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.step_results["x"].status, StepStatus::Succeeded);
        assert_eq!(execution.step_results["x"].retry_count, 2);
    }
}
