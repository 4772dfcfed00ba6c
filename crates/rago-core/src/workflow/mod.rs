//! Workflow / DAG Engine: the Workflow/Step/Execution data model, the
//! generic DAG underneath it, and the level-by-level execution engine.

pub mod dag;
pub mod engine;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use dag::Dag;
pub use engine::{Engine, EngineConfig, StepExecutor};

/// The kind of work a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepType {
    Action,
    Condition,
    Loop,
    Parallel,
    Subflow,
    Wait,
    Variable,
}

/// A simple `field <op> value` guard, compared as canonicalized strings, or
/// an expression string evaluated by an external `ConditionEvaluator`.
#[derive(Debug, Clone)]
pub enum Guard {
    Simple {
        field: String,
        op: ComparisonOp,
        value: String,
    },
    Expression(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    fn evaluate(self, lhs: &str, rhs: &str) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

/// Evaluates an expression-form [`Guard::Expression`] against an execution
/// context. An external collaborator injected by the caller.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, context: &ExecutionContext) -> bool;
}

/// A per-step retry policy; falls back to the engine default when absent.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
            backoff_factor: 2.0,
        }
    }
}

/// One node in a workflow's DAG.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub step_type: StepType,
    pub action: Option<String>,
    pub parameters: Value,
    pub dependencies: Vec<String>,
    pub on_success: Vec<String>,
    pub on_failure: Vec<String>,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout: Option<Duration>,
    pub guard: Option<Guard>,
}

impl Step {
    pub fn new(id: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            step_type,
            action: None,
            parameters: Value::Null,
            dependencies: Vec::new(),
            on_success: Vec::new(),
            on_failure: Vec::new(),
            retry_policy: None,
            timeout: None,
            guard: None,
        }
    }
}

/// A named, versioned sequence of steps.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub steps: Vec<Step>,
    pub triggers: Vec<String>,
    pub variables: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The variable bag threaded through a single execution: the union of
/// workflow-defined variables and caller input, caller input winning ties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub variables: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.variables.get(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

/// The outcome of one attempt to run a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl StepResult {
    fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            output: None,
            error: None,
            retry_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

/// A record of one attempt to run a workflow end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub input: HashMap<String, Value>,
    pub output: HashMap<String, Value>,
    pub step_results: HashMap<String, StepResult>,
    pub error: Option<String>,
    pub context: ExecutionContext,
}

impl Execution {
    pub fn new(id: impl Into<String>, workflow: &Workflow, input: HashMap<String, Value>) -> Self {
        let mut variables = workflow.variables.clone();
        for (key, value) in &input {
            variables.insert(key.clone(), value.clone());
        }
        let step_results = workflow
            .steps
            .iter()
            .map(|s| (s.id.clone(), StepResult::pending()))
            .collect();
        Self {
            id: id.into(),
            workflow_id: workflow.id.clone(),
            status: ExecutionStatus::Pending,
            started_at: None,
            ended_at: None,
            output: HashMap::new(),
            step_results,
            error: None,
            context: ExecutionContext { variables },
            input,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_ops_compare_as_canonicalized_strings() {
        // Lexical, not numeric: "10" < "9" because '1' < '9'.
        assert!(ComparisonOp::Lt.evaluate("10", "9"));
        assert!(ComparisonOp::Eq.evaluate("done", "done"));
        assert!(ComparisonOp::Ne.evaluate("done", "pending"));
    }

    #[test]
    fn execution_context_merges_workflow_and_caller_variables_caller_wins() {
        let workflow = Workflow {
            id: "wf".to_string(),
            name: "wf".to_string(),
            version: 1,
            steps: Vec::new(),
            triggers: Vec::new(),
            variables: HashMap::from([("env".to_string(), Value::String("prod".to_string()))]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let input = HashMap::from([("env".to_string(), Value::String("staging".to_string()))]);
        let execution = Execution::new("exec-1", &workflow, input);
        assert_eq!(
            execution.context.get("env"),
            Some(&Value::String("staging".to_string()))
        );
    }
}
