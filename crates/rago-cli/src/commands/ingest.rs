//! `rago ingest`

use anyhow::Result;
use rago_core::config::Config;
use rago_core::ingest::{IngestPipeline, IngestRequest};
use rago_core::llm::HttpEmbedder;
use rago_core::store::{Database, Metadata};

use crate::app::IngestArgs;

pub async fn run(args: IngestArgs, db: &Database, config: &Config) -> Result<()> {
    let content = std::fs::read_to_string(&args.path)?;
    let embedder = HttpEmbedder::from_env()?;
    let pipeline = IngestPipeline::new(std::sync::Arc::new(embedder), None);

    let request = IngestRequest {
        document_id: None,
        collection: args.collection,
        path: args.path.to_str().map(|s| s.to_string()),
        url: None,
        content,
        metadata: Metadata::new(),
        chunk_method: args
            .chunk_method
            .unwrap_or_else(|| config.chunker.method.clone()),
        chunk_size: args.chunk_size.unwrap_or(config.chunker.chunk_size),
        chunk_overlap: args.chunk_overlap.unwrap_or(config.chunker.overlap),
        extract_metadata: args.extract_metadata || config.ingest.metadata_extraction.enable,
    };

    let report = pipeline.ingest(db, request).await?;
    println!(
        "ingested document {} ({} of {} chunks indexed)",
        report.document_id, report.chunks_succeeded, report.chunks_total
    );
    Ok(())
}
