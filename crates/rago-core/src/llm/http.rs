//! Reference HTTP adapters over `reqwest`: a `reqwest::Client` with a
//! timeout, JSON request/response bodies. These are generic adapters against
//! a minimal JSON protocol, not a specific provider integration — concrete
//! provider wiring is out of scope.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RagoError, Result};
use crate::tools::ToolDefinition;

use super::traits::{
    Embedder, GenerateWithToolsResponse, GenerationOptions, Generator, Message, StreamCallback,
    StreamEvent,
};

/// Connection details for an HTTP embedding/generation endpoint.
#[derive(Debug, Clone)]
pub struct HttpEndpointConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub dimensions: usize,
}

impl HttpEndpointConfig {
    pub fn from_env(prefix: &str) -> Result<Self> {
        let base_url = std::env::var(format!("{prefix}_BASE_URL"))
            .map_err(|_| RagoError::Config(format!("{prefix}_BASE_URL is not set")))?;
        let model = std::env::var(format!("{prefix}_MODEL"))
            .map_err(|_| RagoError::Config(format!("{prefix}_MODEL is not set")))?;
        let api_key = std::env::var(format!("{prefix}_API_KEY")).ok();
        let dimensions = std::env::var(format!("{prefix}_DIMENSIONS"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(768);
        Ok(Self {
            base_url,
            model,
            api_key,
            timeout: Duration::from_secs(30),
            dimensions,
        })
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// A reference `Embedder` that POSTs to `{base_url}/embeddings` with a plain
/// `{model, input}` body and expects `{embeddings: [[f32]]}` back.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: HttpEndpointConfig,
}

impl HttpEmbedder {
    pub fn new(config: HttpEndpointConfig) -> Result<Self> {
        let client = build_client(config.timeout)?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(HttpEndpointConfig::from_env("RAGO_EMBEDDER")?)
    }

    fn request(&self, texts: &[String]) -> reqwest::RequestBuilder {
        let url = format!("{}/embeddings", self.config.base_url);
        let mut builder = self.client.post(url).json(&EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        });
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| RagoError::Llm("embedding endpoint returned no vectors".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.request(texts).send().await?;
        let response = response.error_for_status()?;
        let body: EmbeddingResponse = response.json().await?;
        Ok(body.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: &'a [ToolDefinition],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    content: String,
    #[serde(default)]
    tool_calls: Vec<ToolCallWire>,
    #[serde(default = "default_true")]
    finished: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct ToolCallWire {
    id: String,
    name: String,
    arguments: Value,
}

/// A reference `Generator` that POSTs to `{base_url}/chat/completions` with a
/// `{model, messages, tools, temperature, max_tokens}` body and expects
/// `{content, tool_calls, finished}` back. Streaming is emulated by replaying
/// the full response through the callback as a single content event followed
/// by any tool calls, since this reference protocol has no wire-level
/// streaming of its own.
pub struct HttpGenerator {
    client: reqwest::Client,
    config: HttpEndpointConfig,
}

impl HttpGenerator {
    pub fn new(config: HttpEndpointConfig) -> Result<Self> {
        let client = build_client(config.timeout)?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(HttpEndpointConfig::from_env("RAGO_GENERATOR")?)
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: &GenerationOptions,
    ) -> Result<GenerateWithToolsResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let mut builder = self.client.post(url).json(&GenerateRequest {
            model: &self.config.model,
            messages,
            tools,
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
        });
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;
        let response = response.error_for_status()?;
        let body: GenerateResponse = response.json().await?;
        Ok(GenerateWithToolsResponse {
            content: body.content,
            tool_calls: body
                .tool_calls
                .into_iter()
                .map(|call| super::traits::ToolCallRequest {
                    id: call.id,
                    name: call.name,
                    arguments: call.arguments,
                })
                .collect(),
            finished: body.finished,
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<String> {
        let messages = vec![Message::user(prompt)];
        let response = self.complete(&messages, &[], opts).await?;
        Ok(response.content)
    }

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: &GenerationOptions,
    ) -> Result<GenerateWithToolsResponse> {
        self.complete(messages, tools, opts).await
    }

    async fn stream_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: &GenerationOptions,
        callback: StreamCallback<'_>,
    ) -> Result<GenerateWithToolsResponse> {
        let response = self.complete(messages, tools, opts).await?;
        if !response.content.is_empty() {
            callback(StreamEvent::Content(response.content.clone()));
        }
        if !response.tool_calls.is_empty() {
            callback(StreamEvent::ToolCalls(response.tool_calls.clone()));
        }
        callback(StreamEvent::Done);
        Ok(response)
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
        opts: &GenerationOptions,
    ) -> Result<Value> {
        let instructed = format!(
            "{prompt}\n\nRespond with JSON matching this schema:\n{}",
            serde_json::to_string(schema)?
        );
        let text = self.generate(&instructed, opts).await?;
        serde_json::from_str(&text)
            .map_err(|e| RagoError::Llm(format!("structured response was not valid JSON: {e}")))
    }
}
