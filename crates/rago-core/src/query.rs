//! Glue / Query Processor: wires the Hybrid Retriever's output into the
//! Generator directly, or into the Tool-Calling Coordinator when tools are
//! supplied, for end-to-end query answering.

use std::sync::Arc;

use crate::coordinator::{Conversation, Coordinator};
use crate::error::Result;
use crate::llm::{Embedder, GenerationOptions, Generator, Message};
use crate::retrieve::{HybridRetriever, QueryRequest, RetrievedChunk, RrfConfig};
use crate::store::Database;
use crate::tools::{ToolContext, ToolDefinition};

/// One end-to-end question against the retrieval-augmented system.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub query: QueryRequest,
    pub generation_opts: GenerationOptions,
}

/// The result of answering a query: the generated (or coordinated) answer,
/// plus the retrieved context it was grounded in.
#[derive(Debug, Clone)]
pub struct AnswerResponse {
    pub answer: String,
    pub retrieved: Vec<RetrievedChunk>,
    pub conversation: Option<Conversation>,
}

fn build_context_prompt(query: &str, retrieved: &[RetrievedChunk]) -> String {
    if retrieved.is_empty() {
        return query.to_string();
    }
    let mut prompt = String::from("Answer the question using the context below.\n\nContext:\n");
    for chunk in retrieved {
        prompt.push_str("- ");
        prompt.push_str(&chunk.content);
        prompt.push('\n');
    }
    prompt.push_str("\nQuestion: ");
    prompt.push_str(query);
    prompt
}

/// Answers one query by retrieving context and invoking either the
/// Generator directly (no tools) or the Tool-Calling Coordinator (tools
/// supplied).
pub struct QueryProcessor<'a> {
    db: &'a Database,
    rrf_config: RrfConfig,
}

impl<'a> QueryProcessor<'a> {
    pub fn new(db: &'a Database, rrf_config: RrfConfig) -> Self {
        Self { db, rrf_config }
    }

    pub async fn answer(
        &self,
        embedder: &dyn Embedder,
        generator: &dyn Generator,
        coordinator: Option<&Coordinator<'_>>,
        tools: &[ToolDefinition],
        ctx: &ToolContext,
        request: &AnswerRequest,
    ) -> Result<AnswerResponse> {
        let retriever = HybridRetriever::new(self.db, self.rrf_config);
        let retrieved = retriever.retrieve(embedder, &request.query).await?;
        let prompt = build_context_prompt(&request.query.text, &retrieved);

        if tools.is_empty() || coordinator.is_none() {
            let answer = generator.generate(&prompt, &request.generation_opts).await?;
            return Ok(AnswerResponse {
                answer,
                retrieved,
                conversation: None,
            });
        }

        let coordinator = coordinator.unwrap();
        let conversation = coordinator
            .run(
                generator,
                vec![Message::user(prompt)],
                tools,
                &request.generation_opts,
                ctx,
            )
            .await?;

        let answer = conversation
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::llm::Role::Assistant))
            .map(|m| m.content.clone())
            .unwrap_or_default();

        Ok(AnswerResponse {
            answer,
            retrieved,
            conversation: Some(conversation),
        })
    }
}

/// Convenience constructor matching how `rago-cli`/`rago-mcp` wire a
/// coordinator from an executor, config, and database.
pub fn coordinator_from(
    executor: Arc<crate::tools::executor::Executor>,
    config: crate::coordinator::CoordinatorConfig,
    db: &Database,
) -> Coordinator<'_> {
    Coordinator::new(executor, config, db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }
        fn dimensions(&self) -> usize {
            2
        }
        fn model_name(&self) -> &str {
            "stub"
        }
    }

    struct StubGenerator;

    #[async_trait]
    impl Generator for StubGenerator {
        async fn generate(&self, prompt: &str, _opts: &GenerationOptions) -> Result<String> {
            Ok(format!("answered: {prompt}"))
        }
        async fn generate_with_tools(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _opts: &GenerationOptions,
        ) -> Result<crate::llm::GenerateWithToolsResponse> {
            unreachable!("test does not exercise tool calling")
        }
        async fn stream_with_tools(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _opts: &GenerationOptions,
            _callback: crate::llm::StreamCallback<'_>,
        ) -> Result<crate::llm::GenerateWithToolsResponse> {
            unreachable!("test does not exercise streaming")
        }
        async fn generate_structured(
            &self,
            _prompt: &str,
            _schema: &Value,
            _opts: &GenerationOptions,
        ) -> Result<Value> {
            unreachable!("test does not exercise structured output")
        }
    }

    #[tokio::test]
    async fn answer_without_tools_calls_generate_directly() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let processor = QueryProcessor::new(&db, RrfConfig::default());
        let ctx = ToolContext::default();
        let request = AnswerRequest {
            query: QueryRequest {
                text: "what is rago?".to_string(),
                top_k: 5,
                collection: None,
                filter: None,
            },
            generation_opts: GenerationOptions::default(),
        };

        let response = processor
            .answer(&StubEmbedder, &StubGenerator, None, &[], &ctx, &request)
            .await
            .unwrap();

        assert!(response.answer.contains("what is rago?"));
        assert!(response.retrieved.is_empty());
        assert!(response.conversation.is_none());
    }
}
