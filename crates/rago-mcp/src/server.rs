//! MCP server: reads newline-delimited JSON-RPC requests from stdin and
//! writes responses to stdout, dispatching `tools/call` through a
//! [`rago_core::tools::executor::Executor`] in a stdio read-line/dispatch/
//! write-line loop.

use std::sync::Arc;

use anyhow::Result;
use rago_core::tools::executor::Executor;
use rago_core::tools::ToolContext;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

use crate::protocol::*;

pub struct McpServer {
    executor: Arc<Executor>,
    ctx: ToolContext,
}

impl McpServer {
    pub fn new(executor: Arc<Executor>, ctx: ToolContext) -> Self {
        Self { executor, ctx }
    }

    pub async fn run(&self) -> Result<()> {
        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();

        let mut reader = BufReader::new(stdin);
        let mut writer = BufWriter::new(stdout);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    let response =
                        JsonRpcResponse::error(None, -32700, &format!("Parse error: {e}"));
                    self.write_response(&mut writer, &response).await?;
                    continue;
                }
            };

            let response = self.handle_request(&request).await;
            self.write_response(&mut writer, &response).await?;
        }

        Ok(())
    }

    async fn write_response<W: AsyncWriteExt + Unpin>(
        &self,
        writer: &mut W,
        response: &JsonRpcResponse,
    ) -> Result<()> {
        let json = serde_json::to_string(response)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn handle_request(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request),
            "tools/list" => self.handle_tools_list(request),
            "tools/call" => self.handle_tools_call(request).await,
            "resources/list" => self.handle_resources_list(request),
            "prompts/list" => self.handle_prompts_list(request),
            _ => JsonRpcResponse::error(
                request.id.clone(),
                -32601,
                &format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_initialize(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let result = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {},
                "resources": { "subscribe": false },
                "prompts": {}
            },
            "serverInfo": {
                "name": "rago",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        JsonRpcResponse::success(request.id.clone(), result)
    }

    fn handle_tools_list(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let tools: Vec<ToolDefinition> = self
            .executor
            .registry()
            .definitions()
            .into_iter()
            .map(ToolDefinition::from)
            .collect();
        JsonRpcResponse::success(request.id.clone(), serde_json::json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let name = request
            .params
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let arguments = request
            .params
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::json!({}));

        match self.executor.call(&name, &self.ctx, arguments).await {
            Ok((_id, tool_result)) => {
                let result = ToolCallResult::from(tool_result);
                JsonRpcResponse::success(
                    request.id.clone(),
                    serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
                )
            }
            Err(e) => {
                let result = ToolCallResult {
                    content: vec![Content::Text {
                        text: format!("Error: {e}"),
                    }],
                    structured_content: None,
                    is_error: Some(true),
                };
                JsonRpcResponse::success(
                    request.id.clone(),
                    serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
                )
            }
        }
    }

    fn handle_resources_list(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(request.id.clone(), serde_json::json!({ "resources": [] }))
    }

    fn handle_prompts_list(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let prompts = vec![serde_json::json!({
            "name": "query",
            "title": "Rago Query Guide",
            "description": "How to effectively search the knowledge base"
        })];
        JsonRpcResponse::success(
            request.id.clone(),
            serde_json::json!({ "prompts": prompts }),
        )
    }
}

pub async fn start_server(executor: Arc<Executor>, ctx: ToolContext) -> Result<()> {
    let server = McpServer::new(executor, ctx);
    server.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rago_core::tools::executor::ExecutorConfig;
    use rago_core::tools::{Registry, Tool, ToolResult};
    use serde_json::Value;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters(&self) -> &Value {
            static SCHEMA: std::sync::OnceLock<Value> = std::sync::OnceLock::new();
            SCHEMA.get_or_init(|| serde_json::json!({"type": "object"}))
        }
        fn validate(&self, _args: &Value) -> rago_core::Result<()> {
            Ok(())
        }
        async fn execute(&self, _ctx: &ToolContext, args: Value) -> rago_core::Result<ToolResult> {
            Ok(ToolResult::ok(args))
        }
    }

    fn test_server() -> McpServer {
        let mut registry = Registry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        let executor = Arc::new(Executor::new(Arc::new(registry), ExecutorConfig::default()));
        McpServer::new(executor, ToolContext::default())
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let server = test_server();
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(1)),
            method: "initialize".to_string(),
            params: Value::Null,
        };
        let response = server.handle_request(&request).await;
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "rago");
    }

    #[tokio::test]
    async fn tools_list_reports_registered_tool() {
        let server = test_server();
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: "tools/list".to_string(),
            params: Value::Null,
        };
        let response = server.handle_request(&request).await;
        let tools = response.result.unwrap()["tools"].clone();
        assert_eq!(tools[0]["name"], "echo");
    }

    #[tokio::test]
    async fn tools_call_invokes_the_tool() {
        let server = test_server();
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(2)),
            method: "tools/call".to_string(),
            params: serde_json::json!({"name": "echo", "arguments": {"x": 1}}),
        };
        let response = server.handle_request(&request).await;
        let result = response.result.unwrap();
        assert!(result["isError"].is_null());
    }

    #[tokio::test]
    async fn tools_call_on_unknown_tool_is_reported_as_an_error_result() {
        let server = test_server();
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(3)),
            method: "tools/call".to_string(),
            params: serde_json::json!({"name": "missing", "arguments": {}}),
        };
        let response = server.handle_request(&request).await;
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
    }

    #[tokio::test]
    async fn unknown_method_is_a_json_rpc_error() {
        let server = test_server();
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(4)),
            method: "nonsense".to_string(),
            params: Value::Null,
        };
        let response = server.handle_request(&request).await;
        assert_eq!(response.error.unwrap().code, -32601);
    }
}
