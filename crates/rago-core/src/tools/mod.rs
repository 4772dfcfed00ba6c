//! Tool Registry: tool lifecycle and validation. Tool/result shapes
//! generalize the MCP wire format (`ToolDefinition`, `ToolResult`) down to
//! the plain contract the core consumes.

pub mod executor;

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::error::{RagoError, Result};

/// A tool's schema and identity, as exposed to a Generator or over MCP.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped object: `type`, `properties`, `required`, and
    /// optionally `enum`, `default`, `minimum`, `maximum`.
    pub parameters: Value,
}

/// The outcome of a single tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Ambient context passed to every tool execution.
#[derive(Clone)]
pub struct ToolContext {
    pub cancellation: CancellationToken,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            cancellation: CancellationToken::new(),
        }
    }
}

/// A named, schema-typed, externally-callable operation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> &Value;

    /// Validates `args` against this tool's schema without executing it.
    fn validate(&self, args: &Value) -> Result<()>;

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().clone(),
        }
    }
}

struct RegisteredTool {
    tool: Box<dyn Tool>,
    enabled: bool,
}

/// The set of registered tools, keyed by unique name. A single
/// readers-writer lock guards the map.
#[derive(Default)]
pub struct Registry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. Fails with `AlreadyExists` on a duplicate name.
    pub fn register(&self, tool: Box<dyn Tool>) -> Result<()> {
        let mut tools = self.tools.write().expect("registry lock poisoned");
        if tools.contains_key(tool.name()) {
            return Err(RagoError::AlreadyExists(format!(
                "tool '{}' already registered",
                tool.name()
            )));
        }
        tools.insert(
            tool.name().to_string(),
            RegisteredTool {
                tool,
                enabled: true,
            },
        );
        Ok(())
    }

    /// Enables or disables a registered tool without removing it.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut tools = self.tools.write().expect("registry lock poisoned");
        let entry = tools
            .get_mut(name)
            .ok_or_else(|| RagoError::NotFound(format!("tool '{name}'")))?;
        entry.enabled = enabled;
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        let tools = self.tools.read().expect("registry lock poisoned");
        tools
            .get(name)
            .map(|t| t.enabled)
            .ok_or_else(|| RagoError::NotFound(format!("tool '{name}'")))
    }

    /// Returns the definitions of every enabled tool.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().expect("registry lock poisoned");
        tools
            .values()
            .filter(|t| t.enabled)
            .map(|t| t.tool.definition())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        let tools = self.tools.read().expect("registry lock poisoned");
        tools.contains_key(name)
    }

    /// Validates arguments against a registered tool's schema without
    /// executing it.
    pub fn validate(&self, name: &str, args: &Value) -> Result<()> {
        let tools = self.tools.read().expect("registry lock poisoned");
        let entry = tools
            .get(name)
            .ok_or_else(|| RagoError::NotFound(format!("tool '{name}'")))?;
        entry.tool.validate(args)
    }

    /// Executes a registered, enabled tool directly (bypassing the
    /// Executor's concurrency/rate-limit/retry wrapping).
    pub async fn execute(&self, name: &str, ctx: &ToolContext, args: Value) -> Result<ToolResult> {
        let (enabled,) = {
            let tools = self.tools.read().expect("registry lock poisoned");
            let entry = tools
                .get(name)
                .ok_or_else(|| RagoError::NotFound(format!("tool '{name}'")))?;
            (entry.enabled,)
        };
        if !enabled {
            return Err(RagoError::InvalidInput(format!("tool '{name}' is disabled")));
        }
        self.validate(name, &args)?;

        // The tool itself cannot be held across the `.execute` await while
        // the lock is held, so look it up again via a short-lived read guard
        // that we drop before awaiting is not possible with a trait object
        // behind a lock directly; instead we take the read guard for the
        // duration of the call, which is safe because `Tool::execute` takes
        // `&self`, not `&mut self`.
        let tools = self.tools.read().expect("registry lock poisoned");
        let entry = tools
            .get(name)
            .ok_or_else(|| RagoError::NotFound(format!("tool '{name}'")))?;
        entry.tool.execute(ctx, args).await
    }
}
