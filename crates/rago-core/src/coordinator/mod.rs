//! Tool-Calling Coordinator: orchestrates multi-round conversations between
//! a `Generator` and the tool `Executor`. Conversation state is a single
//! `RwLock`-guarded map with TTL cleanup, layered over a durable
//! create/get/touch/cleanup store, generalized from a flat context table
//! into a full message-history conversation.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::{RagoError, Result};
use crate::llm::{
    GenerateWithToolsResponse, GenerationOptions, Generator, Message, StreamCallback, StreamEvent,
    ToolCallRequest,
};
use crate::store::Database;
use crate::tools::executor::Executor;
use crate::tools::{ToolContext, ToolDefinition, ToolResult};

/// One tool call executed during a conversation, alongside its result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedToolCall {
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub result: Option<ToolResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationStatus {
    InProgress,
    Completed,
    Errored,
}

/// Durable state for one tool-calling conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<Message>,
    pub executed_tool_calls: Vec<ExecutedToolCall>,
    pub status: ConversationStatus,
    pub rounds: usize,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// Tunables mirroring `ConversationConfig` in `config.rs`.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub max_tool_calls: usize,
    pub max_rounds: usize,
    pub conversation_ttl: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: 10,
            max_rounds: 5,
            conversation_ttl: Duration::from_secs(1800),
        }
    }
}

/// Renders a tool result as the content of a `role: tool` message: JSON
/// preferred, `Debug` formatting as a fallback for non-serializable data,
/// and a fixed failure string on error.
fn format_tool_message(tool_name: &str, outcome: &Result<ToolResult>) -> String {
    match outcome {
        Ok(result) if result.success => match &result.data {
            Some(value) => serde_json::to_string(value)
                .unwrap_or_else(|_| format!("{value:?}")),
            None => "null".to_string(),
        },
        Ok(result) => format!(
            "Tool {tool_name} failed: {}",
            result.error.clone().unwrap_or_else(|| "unknown error".to_string())
        ),
        Err(err) => format!("Tool {tool_name} failed: {err}"),
    }
}

/// Orchestrates rounds of generation and tool execution, bounded by
/// `max_rounds`/`max_tool_calls`, over a durable conversation table. Holds a
/// borrowed `Database` rather than an `Arc<Mutex<_>>` since
/// `rusqlite::Connection` is `Send` but not `Sync` and `Coordinator`'s
/// methods are never spawned onto other tasks.
pub struct Coordinator<'a> {
    executor: std::sync::Arc<Executor>,
    config: CoordinatorConfig,
    conversations: RwLock<HashMap<String, Conversation>>,
    db: &'a Database,
}

impl<'a> Coordinator<'a> {
    pub fn new(executor: std::sync::Arc<Executor>, config: CoordinatorConfig, db: &'a Database) -> Self {
        Self {
            executor,
            config,
            conversations: RwLock::new(HashMap::new()),
            db,
        }
    }

    /// Looks up a conversation, checking the in-memory table first and
    /// falling back to the durable store.
    pub fn conversation(&self, id: &str) -> Option<Conversation> {
        if let Some(conv) = self
            .conversations
            .read()
            .expect("conversations lock poisoned")
            .get(id)
            .cloned()
        {
            return Some(conv);
        }

        let state = self.db.get_conversation(id).ok().flatten()?;
        serde_json::from_str(&state).ok()
    }

    /// Drops conversations whose last activity is older than the configured
    /// TTL, from both the in-memory table and the durable store.
    pub fn sweep_expired(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.conversation_ttl).unwrap_or_default();
        self.conversations
            .write()
            .expect("conversations lock poisoned")
            .retain(|_, conv| conv.last_active_at > cutoff);
        if let Err(err) = self.db.delete_conversations_before(&cutoff.to_rfc3339()) {
            warn!(error = %err, "failed to sweep expired conversations from storage");
        }
    }

    /// Runs a conversation to completion: repeatedly invokes the generator,
    /// executes any requested tool calls concurrently through the executor,
    /// and feeds their results back until a tool-call-free response is
    /// produced or a round/call limit is hit.
    pub async fn run(
        &self,
        generator: &dyn Generator,
        initial_messages: Vec<Message>,
        tools: &[ToolDefinition],
        opts: &GenerationOptions,
        ctx: &ToolContext,
    ) -> Result<Conversation> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut conversation = Conversation {
            id: id.clone(),
            messages: initial_messages,
            executed_tool_calls: Vec::new(),
            status: ConversationStatus::InProgress,
            rounds: 0,
            created_at: now,
            last_active_at: now,
        };
        self.store(conversation.clone());

        loop {
            let response = match generator
                .generate_with_tools(&conversation.messages, tools, opts)
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    conversation.status = ConversationStatus::Errored;
                    self.store(conversation.clone());
                    return Err(err);
                }
            };
            conversation.rounds += 1;

            let mut assistant_message = Message::assistant(response.content.clone());
            assistant_message.tool_calls = response.tool_calls.clone();
            conversation.messages.push(assistant_message);

            if response.tool_calls.is_empty() {
                conversation.status = ConversationStatus::Completed;
                conversation.last_active_at = Utc::now();
                self.store(conversation.clone());
                return Ok(conversation);
            }

            // `maxRounds` exhausted: the conversation completes with the
            // assistant's last content rather than executing the tool calls
            // that would have started a round beyond the limit.
            if conversation.rounds >= self.config.max_rounds {
                conversation.status = ConversationStatus::Completed;
                conversation.last_active_at = Utc::now();
                self.store(conversation.clone());
                return Ok(conversation);
            }

            if response.tool_calls.len() > self.config.max_tool_calls {
                conversation.status = ConversationStatus::Errored;
                self.store(conversation.clone());
                return Err(RagoError::TooManyToolCalls {
                    requested: response.tool_calls.len(),
                    limit: self.config.max_tool_calls,
                });
            }

            let executed = self.execute_round(ctx, &response.tool_calls).await;
            for (call, outcome) in response.tool_calls.iter().zip(executed.iter()) {
                let content = format_tool_message(&call.name, outcome);
                conversation.messages.push(Message::tool(call.id.clone(), content));
                conversation.executed_tool_calls.push(ExecutedToolCall {
                    id: call.id.clone(),
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: outcome.as_ref().ok().cloned(),
                    error: outcome.as_ref().err().map(|e| e.to_string()),
                });
            }
            conversation.last_active_at = Utc::now();
            self.store(conversation.clone());
        }
    }

    /// Streaming entry point: replays each round's content through
    /// `callback`, then invokes it once more with the round's executed tool
    /// calls, and a final time on completion.
    pub async fn run_streaming(
        &self,
        generator: &dyn Generator,
        initial_messages: Vec<Message>,
        tools: &[ToolDefinition],
        opts: &GenerationOptions,
        ctx: &ToolContext,
        mut callback: StreamCallback<'_>,
    ) -> Result<Conversation> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut conversation = Conversation {
            id: id.clone(),
            messages: initial_messages,
            executed_tool_calls: Vec::new(),
            status: ConversationStatus::InProgress,
            rounds: 0,
            created_at: now,
            last_active_at: now,
        };
        self.store(conversation.clone());

        loop {
            let response: GenerateWithToolsResponse = generator
                .stream_with_tools(&conversation.messages, tools, opts, callback)
                .await?;
            conversation.rounds += 1;

            let mut assistant_message = Message::assistant(response.content.clone());
            assistant_message.tool_calls = response.tool_calls.clone();
            conversation.messages.push(assistant_message);

            if response.tool_calls.is_empty() {
                conversation.status = ConversationStatus::Completed;
                conversation.last_active_at = Utc::now();
                self.store(conversation.clone());
                callback(StreamEvent::Done);
                return Ok(conversation);
            }

            if conversation.rounds >= self.config.max_rounds {
                conversation.status = ConversationStatus::Completed;
                conversation.last_active_at = Utc::now();
                self.store(conversation.clone());
                callback(StreamEvent::Done);
                return Ok(conversation);
            }

            if response.tool_calls.len() > self.config.max_tool_calls {
                conversation.status = ConversationStatus::Errored;
                self.store(conversation.clone());
                return Err(RagoError::TooManyToolCalls {
                    requested: response.tool_calls.len(),
                    limit: self.config.max_tool_calls,
                });
            }

            let executed = self.execute_round(ctx, &response.tool_calls).await;
            callback(StreamEvent::ToolCalls(response.tool_calls.clone()));
            for (call, outcome) in response.tool_calls.iter().zip(executed.iter()) {
                let content = format_tool_message(&call.name, outcome);
                conversation.messages.push(Message::tool(call.id.clone(), content));
                conversation.executed_tool_calls.push(ExecutedToolCall {
                    id: call.id.clone(),
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: outcome.as_ref().ok().cloned(),
                    error: outcome.as_ref().err().map(|e| e.to_string()),
                });
            }
            conversation.last_active_at = Utc::now();
            self.store(conversation.clone());
        }
    }

    async fn execute_round(
        &self,
        ctx: &ToolContext,
        calls: &[ToolCallRequest],
    ) -> Vec<Result<ToolResult>> {
        let futures = calls.iter().map(|call| {
            let executor = self.executor.clone();
            let ctx = ctx.clone();
            let name = call.name.clone();
            let args = call.arguments.clone();
            async move { executor.call(&name, &ctx, args).await.map(|(_, result)| result) }
        });
        futures::future::join_all(futures).await
    }

    fn store(&self, conversation: Conversation) {
        match serde_json::to_string(&conversation) {
            Ok(state) => {
                if let Err(err) = self.db.put_conversation(
                    &conversation.id,
                    &state,
                    &conversation.created_at.to_rfc3339(),
                    &conversation.last_active_at.to_rfc3339(),
                ) {
                    warn!(error = %err, conversation_id = %conversation.id, "failed to persist conversation");
                }
            }
            Err(err) => {
                warn!(error = %err, conversation_id = %conversation.id, "failed to serialize conversation");
            }
        }
        self.conversations
            .write()
            .expect("conversations lock poisoned")
            .insert(conversation.id.clone(), conversation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use crate::tools::{Registry, Tool};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes"
        }
        fn parameters(&self) -> &Value {
            static SCHEMA: std::sync::OnceLock<Value> = std::sync::OnceLock::new();
            SCHEMA.get_or_init(|| json!({"type": "object"}))
        }
        fn validate(&self, _args: &Value) -> Result<()> {
            Ok(())
        }
        async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolResult> {
            Ok(ToolResult::ok(args))
        }
    }

    struct ScriptedGenerator {
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, _prompt: &str, _opts: &GenerationOptions) -> Result<String> {
            Ok("unused".to_string())
        }

        async fn generate_with_tools(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _opts: &GenerationOptions,
        ) -> Result<GenerateWithToolsResponse> {
            let round = self.call_count.fetch_add(1, Ordering::SeqCst);
            if round == 0 {
                Ok(GenerateWithToolsResponse {
                    content: String::new(),
                    tool_calls: vec![ToolCallRequest {
                        id: "call-1".to_string(),
                        name: "echo".to_string(),
                        arguments: json!({"x": 1}),
                    }],
                    finished: false,
                })
            } else {
                Ok(GenerateWithToolsResponse {
                    content: "final answer".to_string(),
                    tool_calls: Vec::new(),
                    finished: true,
                })
            }
        }

        async fn stream_with_tools(
            &self,
            messages: &[Message],
            tools: &[ToolDefinition],
            opts: &GenerationOptions,
            _callback: StreamCallback<'_>,
        ) -> Result<GenerateWithToolsResponse> {
            self.generate_with_tools(messages, tools, opts).await
        }

        async fn generate_structured(
            &self,
            _prompt: &str,
            _schema: &Value,
            _opts: &GenerationOptions,
        ) -> Result<Value> {
            Ok(json!({}))
        }
    }

    fn coordinator(db: &Database) -> Coordinator<'_> {
        let registry = Arc::new(Registry::new());
        registry.register(Box::new(EchoTool)).unwrap();
        let executor = Arc::new(Executor::new(registry, crate::tools::executor::ExecutorConfig::default()));
        Coordinator::new(executor, CoordinatorConfig::default(), db)
    }

    #[tokio::test]
    async fn tool_call_round_then_final_answer() {
        let db = test_db();
        let coordinator = coordinator(&db);
        let generator = ScriptedGenerator {
            call_count: AtomicUsize::new(0),
        };
        let ctx = ToolContext::default();
        let conversation = coordinator
            .run(
                &generator,
                vec![Message::user("hello")],
                &[],
                &GenerationOptions::default(),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(conversation.status, ConversationStatus::Completed);
        assert_eq!(conversation.executed_tool_calls.len(), 1);
        assert!(conversation.messages.iter().any(|m| m.content == "final answer"));
    }

    #[tokio::test]
    async fn max_rounds_reached_completes_without_executing_pending_tool_calls() {
        let db = test_db();
        let coordinator_with_limit = {
            let registry = Arc::new(Registry::new());
            registry.register(Box::new(EchoTool)).unwrap();
            let executor = Arc::new(Executor::new(registry, crate::tools::executor::ExecutorConfig::default()));
            Coordinator::new(
                executor,
                CoordinatorConfig {
                    max_rounds: 1,
                    ..CoordinatorConfig::default()
                },
                &db,
            )
        };
        let generator = ScriptedGenerator {
            call_count: AtomicUsize::new(0),
        };
        let ctx = ToolContext::default();
        let conversation = coordinator_with_limit
            .run(
                &generator,
                vec![Message::user("hello")],
                &[],
                &GenerationOptions::default(),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(conversation.status, ConversationStatus::Completed);
        assert_eq!(conversation.rounds, 1);
        assert!(conversation.executed_tool_calls.is_empty());
    }

    #[test]
    fn format_tool_message_prefers_json_then_debug_then_failure_string() {
        let ok = Ok(ToolResult::ok(json!({"a": 1})));
        assert_eq!(format_tool_message("t", &ok), "{\"a\":1}");

        let failed_result = Ok(ToolResult::fail("bad input"));
        assert_eq!(format_tool_message("t", &failed_result), "Tool t failed: bad input");

        let err: Result<ToolResult> = Err(RagoError::Timeout("slow".to_string()));
        assert_eq!(format_tool_message("t", &err), "Tool t failed: Timeout: slow");
    }
}
