//! Ingestion Pipeline: load → chunk → embed (+metadata propagation) →
//! optional metadata extraction → persist → keyword index. Within one
//! document, chunks are chunked, embedded, and persisted strictly in
//! increasing `chunk_index` order; the worker pool instead parallelizes
//! across whole documents via a bounded `tokio::sync::mpsc` channel.

use std::str::FromStr;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::warn;
use uuid::Uuid;

use crate::chunker::{chunk as split_into_chunks, ChunkMethod};
use crate::error::{RagoError, Result};
use crate::llm::{Embedder, MetadataExtractor};
use crate::store::{ChunkRecord, Database, Document, Metadata, MetadataValue};

/// One document submitted for ingestion.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub document_id: Option<String>,
    pub collection: String,
    pub path: Option<String>,
    pub url: Option<String>,
    pub content: String,
    pub metadata: Metadata,
    pub chunk_method: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub extract_metadata: bool,
}

/// The outcome of one `ingest` call.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
}

/// Derives a stable chunk id from its owning document and position, so
/// re-ingesting the same document is idempotent.
pub fn deterministic_chunk_id(document_id: &str, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b":");
    hasher.update(chunk_index.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn file_ext(path: Option<&str>) -> Option<String> {
    path.and_then(|p| p.rsplit('.').next().map(|ext| ext.to_string()))
}

/// A document chunked, embedded, and ready for persistence, short of
/// touching `Database` (so it can be produced off the connection-bound
/// thread that eventually writes it).
struct PreparedIngest {
    document_id: String,
    document: Document,
    records: Vec<ChunkRecord>,
    chunks_total: usize,
    last_error: Option<String>,
}

/// Wires an `Embedder` and optional `MetadataExtractor` into a six-step
/// ingestion pipeline over a `Database`.
pub struct IngestPipeline {
    embedder: Arc<dyn Embedder>,
    metadata_extractor: Option<Arc<dyn MetadataExtractor>>,
    worker_count: usize,
    channel_buffer: usize,
}

impl IngestPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, metadata_extractor: Option<Arc<dyn MetadataExtractor>>) -> Self {
        Self {
            embedder,
            metadata_extractor,
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            channel_buffer: 100,
        }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    /// Runs the full ingestion pipeline for one document: chunking,
    /// embedding, and persistence all proceed in increasing `chunk_index`
    /// order.
    pub async fn ingest(&self, db: &Database, request: IngestRequest) -> Result<IngestReport> {
        let prepared = self.prepare(request).await?;
        self.persist(db, prepared)
    }

    /// Ingests several documents, each fully sequential internally, with up
    /// to `worker_count` documents chunked and embedded concurrently. Every
    /// document is still persisted one at a time, in submission order,
    /// since a single `rusqlite` connection cannot be written to
    /// concurrently; only the (network/CPU-bound) chunking and embedding
    /// work is parallelized across documents. Returns one result per
    /// request, in the same order the requests were given.
    pub async fn ingest_many(
        &self,
        db: &Database,
        requests: Vec<IngestRequest>,
    ) -> Vec<Result<IngestReport>> {
        let total = requests.len();
        if total == 0 {
            return Vec::new();
        }

        let worker_count = self.worker_count.min(total).max(1);
        let buffer = self.channel_buffer.min(total);
        let (tx, rx) = mpsc::channel::<(usize, IngestRequest)>(buffer);
        let rx = Arc::new(AsyncMutex::new(rx));

        let mut handles = Vec::new();
        for _ in 0..worker_count {
            let rx = rx.clone();
            let embedder = self.embedder.clone();
            let metadata_extractor = self.metadata_extractor.clone();
            handles.push(tokio::spawn(async move {
                let worker = IngestPipeline {
                    embedder,
                    metadata_extractor,
                    worker_count: 1,
                    channel_buffer: 1,
                };
                let mut prepared = Vec::new();
                loop {
                    let item = { rx.lock().await.recv().await };
                    let Some((index, request)) = item else {
                        break;
                    };
                    prepared.push((index, worker.prepare(request).await));
                }
                prepared
            }));
        }

        for (index, request) in requests.into_iter().enumerate() {
            if tx.send((index, request)).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut prepared: Vec<Option<Result<PreparedIngest>>> = (0..total).map(|_| None).collect();
        for handle in handles {
            let Ok(results) = handle.await else {
                continue;
            };
            for (index, result) in results {
                prepared[index] = Some(result);
            }
        }

        prepared
            .into_iter()
            .map(|slot| match slot {
                Some(Ok(doc)) => self.persist(db, doc),
                Some(Err(err)) => Err(err),
                None => Err(RagoError::Fatal("document was never prepared".to_string())),
            })
            .collect()
    }

    /// Chunks, enriches, and embeds one document without touching `db`.
    /// Chunks are embedded strictly in increasing `chunk_index` order.
    async fn prepare(&self, request: IngestRequest) -> Result<PreparedIngest> {
        let document_id = request
            .document_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let method = ChunkMethod::from_str(&request.chunk_method)?;
        let raw_chunks = split_into_chunks(
            &request.content,
            method,
            request.chunk_size,
            request.chunk_overlap,
        )?;
        let chunks_total = raw_chunks.len();

        let mut document_metadata = request.metadata.clone();
        if request.extract_metadata {
            if let Some(extractor) = &self.metadata_extractor {
                match extractor.extract(&request.content).await {
                    Ok(extracted) => {
                        if let Some(summary) = extracted.summary {
                            document_metadata
                                .insert("summary".to_string(), MetadataValue::Text(summary));
                        }
                        if !extracted.keywords.is_empty() {
                            document_metadata
                                .insert("keywords".to_string(), MetadataValue::Tags(extracted.keywords));
                        }
                        if let Some(doc_type) = extracted.document_type {
                            document_metadata.insert(
                                "document_type".to_string(),
                                MetadataValue::Text(doc_type),
                            );
                        }
                        if let Some(date) = extracted.creation_date {
                            document_metadata
                                .insert("creation_date".to_string(), MetadataValue::Text(date));
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "metadata extraction failed; continuing without enrichment");
                    }
                }
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let document = Document {
            id: document_id.clone(),
            collection: request.collection.clone(),
            path: request.path.clone(),
            url: request.url.clone(),
            content: request.content.clone(),
            metadata: document_metadata.clone(),
            created_at: now.clone(),
            updated_at: now,
        };

        if chunks_total == 0 {
            return Ok(PreparedIngest {
                document_id,
                document,
                records: Vec::new(),
                chunks_total: 0,
                last_error: None,
            });
        }

        let mut chunk_metadata_base = document_metadata;
        chunk_metadata_base.insert(
            "source".to_string(),
            MetadataValue::Text(request.path.clone().or_else(|| request.url.clone()).unwrap_or_default()),
        );
        if let Some(ext) = file_ext(request.path.as_deref()) {
            chunk_metadata_base.insert("file_ext".to_string(), MetadataValue::Text(ext));
        }

        let mut records = Vec::with_capacity(chunks_total);
        let mut last_error = None;
        for (index, raw_chunk) in raw_chunks.iter().enumerate() {
            let embedding = match self.embedder.embed(&raw_chunk.content).await {
                Ok(vector) => vector,
                Err(err) => {
                    warn!(error = %err, chunk_index = index, "chunk embedding failed");
                    last_error = Some(format!("chunk {index} failed to embed: {err}"));
                    continue;
                }
            };

            let mut metadata = chunk_metadata_base.clone();
            metadata.insert(
                "chunk_index".to_string(),
                MetadataValue::Integer(index as i64),
            );

            records.push(ChunkRecord {
                id: deterministic_chunk_id(&document_id, index),
                document_id: document_id.clone(),
                collection: request.collection.clone(),
                chunk_index: index,
                content: raw_chunk.content.clone(),
                metadata,
                embedding,
                created_at: chrono::Utc::now().to_rfc3339(),
            });
        }

        Ok(PreparedIngest {
            document_id,
            document,
            records,
            chunks_total,
            last_error,
        })
    }

    /// Writes a prepared document and its chunks to `db`, one record at a
    /// time in increasing `chunk_index` order.
    fn persist(&self, db: &Database, prepared: PreparedIngest) -> Result<IngestReport> {
        db.put_document(&prepared.document)?;

        let mut succeeded = 0usize;
        let mut last_error = prepared.last_error;
        for record in &prepared.records {
            match db.vector_store(std::slice::from_ref(record)) {
                Ok(()) => match db.keyword_index(std::slice::from_ref(record)) {
                    Ok(()) => succeeded += 1,
                    Err(err) => last_error = Some(err.to_string()),
                },
                Err(err) => last_error = Some(err.to_string()),
            }
        }

        if succeeded < prepared.chunks_total {
            return Err(RagoError::PartialFailure {
                succeeded,
                total: prepared.chunks_total,
                message: last_error.unwrap_or_else(|| "one or more chunks failed".to_string()),
            });
        }

        Ok(IngestReport {
            document_id: prepared.document_id,
            chunks_total: prepared.chunks_total,
            chunks_succeeded: succeeded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }
        fn dimensions(&self) -> usize {
            2
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RagoError::Llm("embedding service unreachable".into()))
        }
        fn dimensions(&self) -> usize {
            2
        }
        fn model_name(&self) -> &str {
            "failing"
        }
    }

    /// Records the order in which chunks are handed to `embed`.
    struct OrderRecordingEmbedder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Embedder for OrderRecordingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(vec![text.len() as f32, 1.0])
        }
        fn dimensions(&self) -> usize {
            2
        }
        fn model_name(&self) -> &str {
            "order-recording"
        }
    }

    fn request(content: &str) -> IngestRequest {
        IngestRequest {
            document_id: Some("doc-1".to_string()),
            collection: "default".to_string(),
            path: Some("notes.txt".to_string()),
            url: None,
            content: content.to_string(),
            metadata: Metadata::new(),
            chunk_method: "sentence".to_string(),
            chunk_size: 500,
            chunk_overlap: 50,
            extract_metadata: false,
        }
    }

    #[tokio::test]
    async fn successful_ingest_indexes_every_chunk() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let pipeline = IngestPipeline::new(Arc::new(FixedEmbedder), None);

        let report = pipeline
            .ingest(&db, request("First sentence here. Second sentence follows."))
            .await
            .unwrap();

        assert_eq!(report.document_id, "doc-1");
        assert_eq!(report.chunks_succeeded, report.chunks_total);
        assert!(report.chunks_total > 0);
        assert!(db.get_document("doc-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn reingesting_the_same_document_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let pipeline = IngestPipeline::new(Arc::new(FixedEmbedder), None);

        pipeline.ingest(&db, request("A single sentence.")).await.unwrap();
        let second = pipeline.ingest(&db, request("A single sentence.")).await.unwrap();
        assert_eq!(second.chunks_succeeded, second.chunks_total);
    }

    #[tokio::test]
    async fn embedding_failures_report_partial_ingest() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let pipeline = IngestPipeline::new(Arc::new(FailingEmbedder), None);

        let err = pipeline
            .ingest(&db, request("One sentence. Another sentence."))
            .await
            .unwrap_err();
        assert!(matches!(err, RagoError::PartialFailure { succeeded: 0, .. }));
        assert!(db.get_document("doc-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_content_ingests_the_document_with_no_chunks() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let pipeline = IngestPipeline::new(Arc::new(FixedEmbedder), None);

        let report = pipeline.ingest(&db, request("   ")).await.unwrap();
        assert_eq!(report.chunks_total, 0);
        assert_eq!(report.chunks_succeeded, 0);
    }

    #[tokio::test]
    async fn chunks_are_embedded_in_increasing_index_order() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let embedder = Arc::new(OrderRecordingEmbedder {
            seen: Mutex::new(Vec::new()),
        });
        let pipeline = IngestPipeline::new(embedder.clone(), None);
        let content = "One sentence. Two sentence. Three sentence.";

        pipeline.ingest(&db, request(content)).await.unwrap();

        let seen = embedder.seen.lock().unwrap();
        assert!(seen.len() >= 2);
        let positions: Vec<usize> = seen
            .iter()
            .map(|chunk| content.find(chunk.as_str()).expect("chunk text must come from source content"))
            .collect();
        let mut sorted_positions = positions.clone();
        sorted_positions.sort();
        assert_eq!(positions, sorted_positions, "chunks must be embedded in increasing chunk_index order");
    }

    #[tokio::test]
    async fn ingest_many_processes_every_document_in_submission_order() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let pipeline = IngestPipeline::new(Arc::new(FixedEmbedder), None).with_worker_count(4);

        let requests = vec![
            IngestRequest {
                document_id: Some("doc-a".to_string()),
                ..request("First document. With two sentences.")
            },
            IngestRequest {
                document_id: Some("doc-b".to_string()),
                ..request("Second document. Also two sentences.")
            },
            IngestRequest {
                document_id: Some("doc-c".to_string()),
                ..request("Third document. Two sentences again.")
            },
        ];

        let reports = pipeline.ingest_many(&db, requests).await;
        assert_eq!(reports.len(), 3);
        let ids: Vec<String> = reports
            .into_iter()
            .map(|r| r.unwrap().document_id)
            .collect();
        assert_eq!(ids, vec!["doc-a", "doc-b", "doc-c"]);
        assert!(db.get_document("doc-a").unwrap().is_some());
        assert!(db.get_document("doc-b").unwrap().is_some());
        assert!(db.get_document("doc-c").unwrap().is_some());
    }

    #[test]
    fn deterministic_ids_are_stable_and_unique_per_index() {
        let a = deterministic_chunk_id("doc-1", 0);
        let b = deterministic_chunk_id("doc-1", 0);
        let c = deterministic_chunk_id("doc-1", 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
