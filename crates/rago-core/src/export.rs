//! Export/Import: a JSON data-portability format with
//! `metadata`/`documents`/`chunks` top-level keys, validated on import
//! against its own stated counts and cross-references. Grounded in the
//! teacher's JSON-serializable storage records, generalized into a
//! stand-alone portable document.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{RagoError, Result};
use crate::store::{Database, Document, Metadata};

const FORMAT_VERSION: &str = "1";

/// A document as it appears inside an export file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub id: String,
    pub collection: String,
    pub path: Option<String>,
    pub url: Option<String>,
    pub content: String,
    pub metadata: Metadata,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Document> for ExportDocument {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            collection: doc.collection,
            path: doc.path,
            url: doc.url,
            content: doc.content,
            metadata: doc.metadata,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

impl From<ExportDocument> for Document {
    fn from(doc: ExportDocument) -> Self {
        Self {
            id: doc.id,
            collection: doc.collection,
            path: doc.path,
            url: doc.url,
            content: doc.content,
            metadata: doc.metadata,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

/// A chunk as it appears inside an export file. `embedding` is omitted
/// (serializes as an empty vector) when the export was taken without
/// vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportChunk {
    pub id: String,
    pub document_id: String,
    pub collection: String,
    pub chunk_index: usize,
    pub content: String,
    pub metadata: Metadata,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub created_at: String,
}

impl From<crate::store::ChunkRecord> for ExportChunk {
    fn from(chunk: crate::store::ChunkRecord) -> Self {
        Self {
            id: chunk.id,
            document_id: chunk.document_id,
            collection: chunk.collection,
            chunk_index: chunk.chunk_index,
            content: chunk.content,
            metadata: chunk.metadata,
            embedding: chunk.embedding,
            created_at: chunk.created_at,
        }
    }
}

impl From<ExportChunk> for crate::store::ChunkRecord {
    fn from(chunk: ExportChunk) -> Self {
        Self {
            id: chunk.id,
            document_id: chunk.document_id,
            collection: chunk.collection,
            chunk_index: chunk.chunk_index,
            content: chunk.content,
            metadata: chunk.metadata,
            embedding: chunk.embedding,
            created_at: chunk.created_at,
        }
    }
}

/// The `metadata` block of an export file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub export_time: String,
    pub version: String,
    pub document_count: usize,
    pub chunk_count: usize,
    pub vector_dim: Option<usize>,
}

/// A complete export file: self-describing metadata plus the documents and
/// chunks it covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportFile {
    pub metadata: ExportMetadata,
    pub documents: Vec<ExportDocument>,
    pub chunks: Vec<ExportChunk>,
}

/// Whether an export includes chunk vectors or omits them to shrink the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorInclusion {
    Include,
    Omit,
}

/// Serializes the full contents of a store (optionally scoped to one
/// collection) into a portable [`ExportFile`].
pub fn export(
    db: &Database,
    collection: Option<&str>,
    vectors: VectorInclusion,
) -> Result<ExportFile> {
    let documents = db.list_documents(collection)?;
    let document_ids: HashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();

    let mut chunks: Vec<ExportChunk> = db
        .all_chunks()?
        .into_iter()
        .filter(|c| document_ids.contains(c.document_id.as_str()))
        .map(ExportChunk::from)
        .collect();

    if vectors == VectorInclusion::Omit {
        for chunk in &mut chunks {
            chunk.embedding.clear();
        }
    }

    let vector_dim = chunks
        .iter()
        .find(|c| !c.embedding.is_empty())
        .map(|c| c.embedding.len());

    let metadata = ExportMetadata {
        export_time: Utc::now().to_rfc3339(),
        version: FORMAT_VERSION.to_string(),
        document_count: documents.len(),
        chunk_count: chunks.len(),
        vector_dim,
    };

    Ok(ExportFile {
        metadata,
        documents: documents.into_iter().map(ExportDocument::from).collect(),
        chunks,
    })
}

/// Validates an export file's internal consistency: stated counts must
/// match the actual array lengths, every chunk must reference a document
/// present in the file, and chunk ids must be unique.
pub fn validate(file: &ExportFile) -> Result<()> {
    if file.metadata.document_count != file.documents.len() {
        return Err(RagoError::InvalidInput(format!(
            "document_count {} disagrees with {} documents",
            file.metadata.document_count,
            file.documents.len()
        )));
    }
    if file.metadata.chunk_count != file.chunks.len() {
        return Err(RagoError::InvalidInput(format!(
            "chunk_count {} disagrees with {} chunks",
            file.metadata.chunk_count,
            file.chunks.len()
        )));
    }

    let document_ids: HashSet<&str> = file.documents.iter().map(|d| d.id.as_str()).collect();
    let mut seen_chunk_ids: HashSet<&str> = HashSet::with_capacity(file.chunks.len());
    for chunk in &file.chunks {
        if !document_ids.contains(chunk.document_id.as_str()) {
            return Err(RagoError::InvalidInput(format!(
                "chunk '{}' references unknown document '{}'",
                chunk.id, chunk.document_id
            )));
        }
        if !seen_chunk_ids.insert(chunk.id.as_str()) {
            return Err(RagoError::InvalidInput(format!(
                "duplicate chunk id '{}'",
                chunk.id
            )));
        }
    }
    Ok(())
}

/// Whether an existing document with the same id should be replaced or left
/// untouched on import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Overwrite,
    SkipExisting,
}

/// A summary of what an import actually did.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub documents_imported: usize,
    pub documents_skipped: usize,
    pub chunks_imported: usize,
}

/// Validates `file`, then writes every document and chunk into `db`.
pub fn import(db: &Database, file: ExportFile, mode: ImportMode) -> Result<ImportReport> {
    validate(&file)?;

    let mut report = ImportReport::default();
    let mut imported_documents: HashSet<String> = HashSet::new();

    for doc in file.documents {
        if mode == ImportMode::SkipExisting && db.get_document(&doc.id)?.is_some() {
            report.documents_skipped += 1;
            continue;
        }
        let id = doc.id.clone();
        db.put_document(&Document::from(doc))?;
        imported_documents.insert(id);
        report.documents_imported += 1;
    }

    let chunks: Vec<crate::store::ChunkRecord> = file
        .chunks
        .into_iter()
        .filter(|c| imported_documents.contains(&c.document_id))
        .map(Into::into)
        .collect();

    if !chunks.is_empty() {
        let with_vectors: Vec<_> = chunks.iter().filter(|c| !c.embedding.is_empty()).cloned().collect();
        if !with_vectors.is_empty() {
            db.vector_store(&with_vectors)?;
        }
        db.keyword_index(&chunks)?;
        report.chunks_imported = chunks.len();
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChunkRecord, MetadataValue};

    fn sample_doc(id: &str) -> Document {
        let now = Utc::now().to_rfc3339();
        Document {
            id: id.to_string(),
            collection: "default".to_string(),
            path: None,
            url: None,
            content: format!("content for {id}"),
            metadata: Metadata::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn sample_chunk(id: &str, doc_id: &str, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            collection: "default".to_string(),
            chunk_index: 0,
            content: format!("chunk {id}"),
            metadata: Metadata::new(),
            embedding,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn export_then_import_round_trips_counts_and_ids() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.put_document(&sample_doc("doc-1")).unwrap();
        let chunk = sample_chunk("chunk-1", "doc-1", vec![1.0, 0.0, 0.0]);
        db.vector_store(&[chunk.clone()]).unwrap();
        db.keyword_index(&[chunk]).unwrap();

        let file = export(&db, None, VectorInclusion::Include).unwrap();
        assert_eq!(file.metadata.document_count, 1);
        assert_eq!(file.metadata.chunk_count, 1);
        assert_eq!(file.metadata.vector_dim, Some(3));

        let fresh = Database::open_in_memory().unwrap();
        fresh.initialize().unwrap();
        let report = import(&fresh, file, ImportMode::Overwrite).unwrap();
        assert_eq!(report.documents_imported, 1);
        assert_eq!(report.chunks_imported, 1);
        assert!(fresh.get_document("doc-1").unwrap().is_some());

        let hits = fresh.vector_search(&[1.0, 0.0, 0.0], 1, None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "chunk-1");
    }

    #[test]
    fn wrong_document_count_is_rejected() {
        let mut file = ExportFile {
            metadata: ExportMetadata {
                export_time: Utc::now().to_rfc3339(),
                version: FORMAT_VERSION.to_string(),
                document_count: 2,
                chunk_count: 0,
                vector_dim: None,
            },
            documents: vec![ExportDocument::from(sample_doc("doc-1"))],
            chunks: Vec::new(),
        };
        let err = validate(&file).unwrap_err();
        assert!(matches!(err, RagoError::InvalidInput(_)));

        file.metadata.document_count = 1;
        validate(&file).unwrap();
    }

    #[test]
    fn chunk_referencing_unknown_document_is_rejected() {
        let file = ExportFile {
            metadata: ExportMetadata {
                export_time: Utc::now().to_rfc3339(),
                version: FORMAT_VERSION.to_string(),
                document_count: 1,
                chunk_count: 1,
                vector_dim: None,
            },
            documents: vec![ExportDocument::from(sample_doc("doc-1"))],
            chunks: vec![ExportChunk::from(sample_chunk("c", "doc-missing", vec![]))],
        };
        let err = validate(&file).unwrap_err();
        assert!(matches!(err, RagoError::InvalidInput(_)));
    }

    #[test]
    fn duplicate_chunk_ids_are_rejected() {
        let file = ExportFile {
            metadata: ExportMetadata {
                export_time: Utc::now().to_rfc3339(),
                version: FORMAT_VERSION.to_string(),
                document_count: 1,
                chunk_count: 2,
                vector_dim: None,
            },
            documents: vec![ExportDocument::from(sample_doc("doc-1"))],
            chunks: vec![
                ExportChunk::from(sample_chunk("dup", "doc-1", vec![])),
                ExportChunk::from(sample_chunk("dup", "doc-1", vec![])),
            ],
        };
        let err = validate(&file).unwrap_err();
        assert!(matches!(err, RagoError::InvalidInput(_)));
    }

    #[test]
    fn skip_existing_mode_leaves_prior_document_untouched() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let mut original = sample_doc("doc-1");
        original
            .metadata
            .insert("owner".into(), MetadataValue::Text("alice".into()));
        db.put_document(&original).unwrap();

        let mut incoming = sample_doc("doc-1");
        incoming.content = "different content".to_string();
        let file = ExportFile {
            metadata: ExportMetadata {
                export_time: Utc::now().to_rfc3339(),
                version: FORMAT_VERSION.to_string(),
                document_count: 1,
                chunk_count: 0,
                vector_dim: None,
            },
            documents: vec![ExportDocument::from(incoming)],
            chunks: Vec::new(),
        };

        let report = import(&db, file, ImportMode::SkipExisting).unwrap();
        assert_eq!(report.documents_skipped, 1);
        assert_eq!(report.documents_imported, 0);
        let stored = db.get_document("doc-1").unwrap().unwrap();
        assert_eq!(stored.content, "content for doc-1");
    }
}
