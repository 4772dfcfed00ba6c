//! `rago workflow`: thin JSON-file front end onto the Workflow Engine's
//! validation pass.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use rago_core::workflow::{ComparisonOp, Engine, EngineConfig, Guard, RetryPolicy, Step, StepType, Workflow};
use serde::Deserialize;
use serde_json::Value;

use crate::app::WorkflowAction;

#[derive(Debug, Deserialize)]
struct WorkflowFile {
    id: String,
    name: String,
    #[serde(default = "default_version")]
    version: u32,
    steps: Vec<StepFile>,
    #[serde(default)]
    triggers: Vec<String>,
    #[serde(default)]
    variables: HashMap<String, Value>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct StepFile {
    id: String,
    #[serde(default)]
    name: String,
    step_type: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    on_success: Vec<String>,
    #[serde(default)]
    on_failure: Vec<String>,
    #[serde(default)]
    guard: Option<GuardFile>,
    #[serde(default)]
    retry_policy: Option<RetryPolicyFile>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
enum GuardFile {
    Simple { field: String, op: String, value: String },
    Expression { expression: String },
}

#[derive(Debug, Deserialize)]
struct RetryPolicyFile {
    max_retries: u32,
    retry_delay_ms: u64,
    backoff_factor: f64,
}

fn parse_step_type(value: &str) -> Result<StepType> {
    Ok(match value {
        "action" => StepType::Action,
        "condition" => StepType::Condition,
        "loop" => StepType::Loop,
        "parallel" => StepType::Parallel,
        "subflow" => StepType::Subflow,
        "wait" => StepType::Wait,
        "variable" => StepType::Variable,
        other => return Err(anyhow!("unknown step type '{other}'")),
    })
}

fn parse_comparison_op(value: &str) -> Result<ComparisonOp> {
    Ok(match value {
        "eq" => ComparisonOp::Eq,
        "ne" => ComparisonOp::Ne,
        "lt" => ComparisonOp::Lt,
        "le" => ComparisonOp::Le,
        "gt" => ComparisonOp::Gt,
        "ge" => ComparisonOp::Ge,
        other => return Err(anyhow!("unknown comparison operator '{other}'")),
    })
}

fn into_workflow(file: WorkflowFile) -> Result<Workflow> {
    let mut steps = Vec::with_capacity(file.steps.len());
    for step in file.steps {
        let mut s = Step::new(step.id, parse_step_type(&step.step_type)?);
        s.name = step.name;
        s.action = step.action;
        s.parameters = step.parameters;
        s.dependencies = step.dependencies;
        s.on_success = step.on_success;
        s.on_failure = step.on_failure;
        s.timeout = step.timeout_ms.map(Duration::from_millis);
        s.retry_policy = step.retry_policy.map(|r| RetryPolicy {
            max_retries: r.max_retries,
            retry_delay: Duration::from_millis(r.retry_delay_ms),
            backoff_factor: r.backoff_factor,
        });
        s.guard = match step.guard {
            Some(GuardFile::Simple { field, op, value }) => Some(Guard::Simple {
                field,
                op: parse_comparison_op(&op)?,
                value,
            }),
            Some(GuardFile::Expression { expression }) => Some(Guard::Expression(expression)),
            None => None,
        };
        steps.push(s);
    }

    let now = Utc::now();
    Ok(Workflow {
        id: file.id,
        name: file.name,
        version: file.version,
        steps,
        triggers: file.triggers,
        variables: file.variables,
        created_at: now,
        updated_at: now,
    })
}

pub async fn run(action: WorkflowAction) -> Result<()> {
    match action {
        WorkflowAction::Validate { path } => {
            let content = std::fs::read_to_string(&path)?;
            let file: WorkflowFile = serde_json::from_str(&content)?;
            let workflow = into_workflow(file)?;
            let engine = Engine::new(EngineConfig::default());
            engine.validate(&workflow)?;
            println!("workflow '{}' is valid ({} steps)", workflow.id, workflow.steps.len());
            Ok(())
        }
    }
}
