//! External collaborator interfaces: Embedder, Generator, and Metadata
//! Extractor. These are the only contracts the core depends on for model
//! access — concrete provider integrations are out of scope and live outside
//! this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::tools::ToolDefinition;

/// A chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in a Generator conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Present on `role: tool` messages; echoes the originating call's id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Present on assistant messages that request tool execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// A tool invocation requested by a Generator response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// How a Generator should pick (or refuse) tools for a round.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Named(String),
}

/// Generation parameters shared by every Generator entry point.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub tool_choice: ToolChoice,
    pub streaming: bool,
    pub thinking: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
            tool_choice: ToolChoice::Auto,
            streaming: false,
            thinking: false,
        }
    }
}

/// The result of one Generator round: content plus any requested tool calls.
#[derive(Debug, Clone)]
pub struct GenerateWithToolsResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finished: bool,
}

/// A chunk streamed by `Generator::stream_with_tools`: either incremental
/// text content, or the tool calls for a completed round.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Content(String),
    ToolCalls(Vec<ToolCallRequest>),
    Done,
}

/// Produces dense vector embeddings for text. Implementations must return
/// vectors of a single, stable dimension for a given model.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// A callback invoked once per streamed event from `stream_with_tools`.
pub type StreamCallback<'a> = &'a mut (dyn FnMut(StreamEvent) + Send);

/// Produces text, optionally reasoning over a tool set across multiple
/// rounds, and optionally constrained to a JSON schema.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<String>;

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: &GenerationOptions,
    ) -> Result<GenerateWithToolsResponse>;

    async fn stream_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: &GenerationOptions,
        callback: StreamCallback<'_>,
    ) -> Result<GenerateWithToolsResponse>;

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
        opts: &GenerationOptions,
    ) -> Result<Value>;
}

/// Structured fields recovered from a document's full text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub summary: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub document_type: Option<String>,
    pub creation_date: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
}

/// Recovers structured fields from a document's full text. Failures here are
/// non-fatal to the ingestion pipeline.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractedMetadata>;
}
