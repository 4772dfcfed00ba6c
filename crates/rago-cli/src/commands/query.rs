//! `rago query`

use anyhow::Result;
use rago_core::config::Config;
use rago_core::llm::{GenerationOptions, HttpEmbedder, HttpGenerator};
use rago_core::query::{AnswerRequest, QueryProcessor};
use rago_core::retrieve::{QueryRequest, RrfConfig};
use rago_core::store::Database;
use rago_core::tools::ToolContext;

use crate::app::{OutputFormat, QueryArgs};

pub async fn run(args: QueryArgs, db: &Database, config: &Config, format: OutputFormat) -> Result<()> {
    let text = args.query.join(" ");
    let embedder = HttpEmbedder::from_env()?;
    let rrf = RrfConfig {
        k: config.rrf.k as f32,
        relevance_threshold: config.rrf.relevance_threshold as f32,
    };
    let processor = QueryProcessor::new(db, rrf);
    let request = AnswerRequest {
        query: QueryRequest {
            text,
            top_k: args.top_k,
            collection: args.collection,
            filter: None,
        },
        generation_opts: GenerationOptions::default(),
    };
    let ctx = ToolContext::default();

    let response = match HttpGenerator::from_env() {
        Ok(generator) => {
            processor
                .answer(&embedder, &generator, None, &[], &ctx, &request)
                .await?
        }
        Err(e) => {
            eprintln!("warning: no generator configured ({e}); showing retrieved context only");
            let retriever = rago_core::retrieve::HybridRetriever::new(db, rrf);
            let retrieved = retriever.retrieve(&embedder, &request.query).await?;
            rago_core::query::AnswerResponse {
                answer: String::new(),
                retrieved,
                conversation: None,
            }
        }
    };

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "answer": response.answer,
                "retrieved": response.retrieved.iter().map(|c| serde_json::json!({
                    "id": c.id,
                    "document_id": c.document_id,
                    "content": c.content,
                    "score": c.score,
                })).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            if !response.answer.is_empty() {
                println!("{}", response.answer);
                println!();
            }
            println!("retrieved {} chunk(s):", response.retrieved.len());
            for chunk in &response.retrieved {
                println!("  [{:.4}] {} :: {}", chunk.score, chunk.id, chunk.content);
            }
        }
    }

    Ok(())
}
