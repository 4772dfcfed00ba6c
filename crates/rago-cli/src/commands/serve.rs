//! `rago serve`: starts the MCP tool-host server over stdio.

use std::sync::Arc;

use anyhow::Result;
use rago_core::config::Config;
use rago_core::tools::executor::{Executor, ExecutorConfig};
use rago_core::tools::{Registry, ToolContext};

pub async fn run(config: &Config) -> Result<()> {
    let registry = Arc::new(Registry::new());
    let executor_config = ExecutorConfig {
        max_concurrent_calls: config.tools.max_concurrent_calls,
        call_timeout: std::time::Duration::from_secs(config.tools.call_timeout_secs),
        calls_per_minute: config.tools.rate_limit.calls_per_minute,
        burst_size: config.tools.rate_limit.burst_size,
        ..ExecutorConfig::default()
    };
    let executor = Arc::new(Executor::new(registry, executor_config));
    rago_mcp::start_server(executor, ToolContext::default()).await
}
