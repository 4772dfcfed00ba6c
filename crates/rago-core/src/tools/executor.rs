//! Tool Executor: wraps the [`Registry`] with bounded concurrency,
//! token-bucket rate limiting, timeouts, and retry-with-backoff. Concurrency
//! and rate limiting use a counting semaphore plus a single shared rate
//! limiter, with no per-call locking.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use serde_json::Value;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::error::{RagoError, Result};

use super::{Registry, ToolContext, ToolResult};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Tunables for the executor; mirrors `ToolsConfig` in `config.rs`.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_concurrent_calls: usize,
    pub call_timeout: Duration,
    pub calls_per_minute: u32,
    pub burst_size: u32,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 5,
            call_timeout: Duration::from_secs(30),
            calls_per_minute: 60,
            burst_size: 10,
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
            backoff_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

/// A record of one call through the executor, kept for observability and
/// for the coordinator to surface executed-tool-call history.
#[derive(Debug, Clone)]
pub struct ExecutionInfo {
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub attempts: u32,
    pub result: Option<ToolResult>,
    pub error: Option<String>,
}

/// Wraps a [`Registry`] with the resource controls every tool call needs: a
/// concurrency cap, a shared rate limiter, a deadline, and bounded retries
/// that skip non-retryable failures.
pub struct Executor {
    registry: Arc<Registry>,
    config: ExecutorConfig,
    semaphore: Semaphore,
    limiter: DirectRateLimiter,
    executions: RwLock<HashMap<String, ExecutionInfo>>,
}

impl Executor {
    /// The tool registry this executor wraps, for callers that need the
    /// definitions list without going through a call (e.g. an MCP server's
    /// `tools/list`).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn new(registry: Arc<Registry>, config: ExecutorConfig) -> Self {
        let per_minute = NonZeroU32::new(config.calls_per_minute.max(1)).unwrap();
        let burst = NonZeroU32::new(config.burst_size.max(1)).unwrap();
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        Self {
            registry,
            semaphore: Semaphore::new(config.max_concurrent_calls.max(1)),
            limiter: RateLimiter::direct(quota),
            config,
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Executes `tool_name` with `args`, honoring the concurrency cap, rate
    /// limit, timeout, and retry policy. Returns the final `ToolResult` (or
    /// error) and records an [`ExecutionInfo`] under a fresh id.
    pub async fn call(
        &self,
        tool_name: &str,
        ctx: &ToolContext,
        args: Value,
    ) -> Result<(String, ToolResult)> {
        let id = Uuid::new_v4().to_string();
        let mut info = ExecutionInfo {
            id: id.clone(),
            tool_name: tool_name.to_string(),
            arguments: args.clone(),
            start_time: Utc::now(),
            end_time: None,
            status: ExecutionStatus::Running,
            attempts: 0,
            result: None,
            error: None,
        };
        self.executions
            .write()
            .expect("executions lock poisoned")
            .insert(id.clone(), info.clone());

        let outcome = self.call_inner(tool_name, ctx, args).await;

        info.end_time = Some(Utc::now());
        match &outcome {
            Ok((attempts, result)) => {
                info.attempts = *attempts;
                info.status = ExecutionStatus::Succeeded;
                info.result = Some(result.clone());
            }
            Err(err) => {
                info.status = ExecutionStatus::Failed;
                info.error = Some(err.to_string());
            }
        }
        self.executions
            .write()
            .expect("executions lock poisoned")
            .insert(id.clone(), info);

        outcome.map(|(_, result)| (id, result))
    }

    async fn call_inner(
        &self,
        tool_name: &str,
        ctx: &ToolContext,
        args: Value,
    ) -> Result<(u32, ToolResult)> {
        if !self.registry.contains(tool_name) {
            return Err(RagoError::NotFound(format!("tool '{tool_name}'")));
        }

        if self.limiter.check().is_err() {
            return Err(RagoError::RateLimited(format!(
                "rate limit exceeded for tool '{tool_name}'"
            )));
        }

        let permit = tokio::select! {
            permit = self.semaphore.acquire() => permit.expect("semaphore closed"),
            _ = ctx.cancellation.cancelled() => {
                return Err(RagoError::Cancelled(format!("cancelled waiting for a slot to run '{tool_name}'")));
            }
        };

        let mut attempt = 0u32;
        let mut delay = self.config.retry_delay;
        loop {
            attempt += 1;
            let call = self
                .registry
                .execute(tool_name, ctx, args.clone());
            let timed = tokio::time::timeout(self.config.call_timeout, call);

            let outcome = tokio::select! {
                result = timed => result.map_err(|_| RagoError::Timeout(format!(
                    "tool '{tool_name}' exceeded {:?}", self.config.call_timeout
                ))),
                _ = ctx.cancellation.cancelled() => {
                    Err(RagoError::Cancelled(format!("cancelled while running '{tool_name}'")))
                }
            };

            let result = match outcome {
                Ok(inner) => inner,
                Err(err) => Err(err),
            };

            match result {
                Ok(result) => {
                    drop(permit);
                    return Ok((attempt, result));
                }
                Err(err) if attempt <= self.config.max_retries && err.is_retryable() => {
                    tokio::time::sleep(delay).await;
                    delay = Duration::from_secs_f64(delay.as_secs_f64() * self.config.backoff_factor);
                    continue;
                }
                Err(err) => {
                    drop(permit);
                    return Err(err);
                }
            }
        }
    }

    pub fn execution(&self, id: &str) -> Option<ExecutionInfo> {
        self.executions
            .read()
            .expect("executions lock poisoned")
            .get(id)
            .cloned()
    }

    /// Drops execution records older than `ttl`, measured from their start
    /// time, regardless of status.
    pub fn sweep_expired(&self, ttl: Duration) {
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or_default();
        self.executions
            .write()
            .expect("executions lock poisoned")
            .retain(|_, info| info.start_time > cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps then echoes"
        }
        fn parameters(&self) -> &Value {
            static SCHEMA: std::sync::OnceLock<Value> = std::sync::OnceLock::new();
            SCHEMA.get_or_init(|| json!({"type": "object"}))
        }
        fn validate(&self, _args: &Value) -> Result<()> {
            Ok(())
        }
        async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolResult> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(ToolResult::ok(args))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails with a retryable error"
        }
        fn parameters(&self) -> &Value {
            static SCHEMA: std::sync::OnceLock<Value> = std::sync::OnceLock::new();
            SCHEMA.get_or_init(|| json!({"type": "object"}))
        }
        fn validate(&self, _args: &Value) -> Result<()> {
            Ok(())
        }
        async fn execute(&self, _ctx: &ToolContext, _args: Value) -> Result<ToolResult> {
            Err(RagoError::Llm("upstream unavailable".into()))
        }
    }

    fn executor(config: ExecutorConfig) -> (Executor, Arc<Registry>) {
        let registry = Arc::new(Registry::new());
        registry.register(Box::new(SlowTool)).unwrap();
        registry.register(Box::new(FailingTool)).unwrap();
        let executor = Executor::new(registry.clone(), config);
        (executor, registry)
    }

    #[tokio::test]
    async fn successful_call_records_one_attempt() {
        let (executor, _registry) = executor(ExecutorConfig::default());
        let ctx = ToolContext::default();
        let (id, result) = executor.call("slow", &ctx, json!({"x": 1})).await.unwrap();
        assert!(result.success);
        assert_eq!(executor.execution(&id).unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let (executor, _registry) = executor(ExecutorConfig::default());
        let ctx = ToolContext::default();
        let err = executor.call("missing", &ctx, json!({})).await.unwrap_err();
        assert!(matches!(err, RagoError::NotFound(_)));
    }

    #[tokio::test]
    async fn retryable_failure_is_retried_up_to_the_limit() {
        let mut config = ExecutorConfig::default();
        config.max_retries = 2;
        config.retry_delay = Duration::from_millis(1);
        let (executor, _registry) = executor(config);
        let ctx = ToolContext::default();
        let err = executor.call("failing", &ctx, json!({})).await.unwrap_err();
        assert!(matches!(err, RagoError::Llm(_)));
    }

    #[tokio::test]
    async fn cancellation_aborts_a_pending_call() {
        let (executor, _registry) = executor(ExecutorConfig::default());
        let ctx = ToolContext::default();
        ctx.cancellation.cancel();
        let err = executor.call("slow", &ctx, json!({})).await.unwrap_err();
        assert!(matches!(err, RagoError::Cancelled(_)));
    }

    #[tokio::test]
    async fn sweep_expired_drops_old_records() {
        let (executor, _registry) = executor(ExecutorConfig::default());
        let ctx = ToolContext::default();
        let (id, _) = executor.call("slow", &ctx, json!({})).await.unwrap();
        executor.sweep_expired(Duration::from_secs(0));
        assert!(executor.execution(&id).is_none());
    }
}
