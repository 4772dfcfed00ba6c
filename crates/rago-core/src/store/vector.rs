//! Vector Store: per-collection dense-vector persistence and top-K cosine
//! similarity search.

use chrono::Utc;
use rusqlite::params;

use crate::error::{RagoError, Result};

use super::metadata::{self, Metadata};
use super::schema::Database;
use super::ChunkRecord;

/// A chunk returned by a similarity search, with its fused-independent score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: String,
    pub document_id: String,
    pub collection: String,
    pub chunk_index: usize,
    pub content: String,
    pub metadata: Metadata,
    pub score: f32,
}

/// Converts an embedding to a little-endian byte BLOB for storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Converts a little-endian byte BLOB back into an embedding.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity between two equal-length vectors; 0.0 for mismatched
/// lengths, empty vectors, or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl Database {
    /// Stores or replaces chunks by id, auto-creating each chunk's
    /// collection. Fails the whole batch with `DimensionMismatch` if a
    /// chunk's vector disagrees with its collection's established dimension.
    pub fn vector_store(&self, chunks: &[ChunkRecord]) -> Result<()> {
        self.conn.execute("BEGIN IMMEDIATE", [])?;
        let result: Result<()> = (|| {
            for chunk in chunks {
                let dimension = chunk.embedding.len();
                match self.collection_dimension(&chunk.collection)? {
                    Some(expected) if expected != dimension => {
                        return Err(RagoError::DimensionMismatch {
                            expected,
                            actual: dimension,
                        });
                    }
                    Some(_) => {}
                    None => self.set_collection_dimension(&chunk.collection, dimension)?,
                }

                let metadata_json = metadata::to_json(&chunk.metadata)?;
                self.conn.execute(
                    "INSERT INTO chunks (id, document_id, collection, chunk_index, content, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                        content = excluded.content,
                        metadata = excluded.metadata,
                        chunk_index = excluded.chunk_index",
                    params![
                        chunk.id,
                        chunk.document_id,
                        chunk.collection,
                        chunk.chunk_index as i64,
                        chunk.content,
                        metadata_json,
                        chunk.created_at,
                    ],
                )?;

                self.conn.execute(
                    "INSERT INTO embeddings (chunk_id, collection, dimension, vector)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(chunk_id) DO UPDATE SET
                        collection = excluded.collection,
                        dimension = excluded.dimension,
                        vector = excluded.vector",
                    params![
                        chunk.id,
                        chunk.collection,
                        dimension as i64,
                        embedding_to_bytes(&chunk.embedding),
                    ],
                )?;
            }
            Ok(())
        })();

        if result.is_ok() {
            self.conn.execute("COMMIT", [])?;
        } else {
            let _ = self.conn.execute("ROLLBACK", []);
        }
        result
    }

    /// Returns up to `top_k` chunks ranked by descending cosine similarity to
    /// `query`, ties broken by ascending chunk id. `filter` restricts the
    /// candidate pool to chunks whose metadata matches every key=value pair.
    pub fn vector_search(
        &self,
        query: &[f32],
        top_k: usize,
        collection: Option<&str>,
        filter: Option<&Metadata>,
    ) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.document_id, c.collection, c.chunk_index, c.content, c.metadata, e.vector
             FROM embeddings e
             JOIN chunks c ON c.id = e.chunk_id
             WHERE (?1 IS NULL OR c.collection = ?1)",
        )?;

        let rows = stmt.query_map(params![collection], |row| {
            let vector_bytes: Vec<u8> = row.get(6)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                vector_bytes,
            ))
        })?;

        let mut candidates = Vec::new();
        for row in rows {
            let (id, document_id, coll, chunk_index, content, metadata_json, vector_bytes) =
                row?;
            let chunk_metadata = metadata::from_json(&metadata_json).unwrap_or_default();
            if let Some(f) = filter {
                if !metadata::matches(&chunk_metadata, f) {
                    continue;
                }
            }
            let vector = bytes_to_embedding(&vector_bytes);
            let score = cosine_similarity(query, &vector);
            candidates.push(ScoredChunk {
                id,
                document_id,
                collection: coll,
                chunk_index: chunk_index as usize,
                content,
                metadata: chunk_metadata,
                score,
            });
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(top_k);
        Ok(candidates)
    }

    /// Returns every chunk across every collection, with its embedding when
    /// one has been indexed (empty vector otherwise). Used by export, which
    /// needs every chunk regardless of collection or search relevance.
    pub fn all_chunks(&self) -> Result<Vec<ChunkRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.document_id, c.collection, c.chunk_index, c.content, c.metadata, c.created_at, e.vector
             FROM chunks c
             LEFT JOIN embeddings e ON e.chunk_id = c.id
             ORDER BY c.id",
        )?;
        let rows = stmt.query_map([], |row| {
            let vector_bytes: Option<Vec<u8>> = row.get(7)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                vector_bytes,
            ))
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            let (id, document_id, collection, chunk_index, content, metadata_json, created_at, vector_bytes) =
                row?;
            let metadata = metadata::from_json(&metadata_json).unwrap_or_default();
            let embedding = vector_bytes.map(|b| bytes_to_embedding(&b)).unwrap_or_default();
            chunks.push(ChunkRecord {
                id,
                document_id,
                collection,
                chunk_index: chunk_index as usize,
                content,
                metadata,
                embedding,
                created_at,
            });
        }
        Ok(chunks)
    }

    /// Removes this document's chunks from the vector index (idempotent).
    pub fn vector_delete(&self, document_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?1)",
            params![document_id],
        )?;
        Ok(())
    }

    /// Removes every chunk from every collection's vector index.
    pub fn vector_reset(&self) -> Result<()> {
        self.conn.execute_batch(
            "DELETE FROM embeddings;
             DELETE FROM collections;",
        )?;
        Ok(())
    }

    fn collection_dimension(&self, collection: &str) -> Result<Option<usize>> {
        let result = self.conn.query_row(
            "SELECT dimension FROM collections WHERE name = ?1",
            params![collection],
            |row| row.get::<_, Option<i64>>(0),
        );
        match result {
            Ok(dim) => Ok(dim.map(|d| d as usize)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_collection_dimension(&self, collection: &str, dimension: usize) -> Result<()> {
        self.conn.execute(
            "INSERT INTO collections (name, dimension, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET dimension = excluded.dimension",
            params![collection, dimension as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, doc_id: &str, collection: &str, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            collection: collection.to_string(),
            chunk_index: 0,
            content: format!("content for {id}"),
            metadata: Metadata::new(),
            embedding,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn embedding_bytes_roundtrip() {
        let original = vec![1.0f32, 2.0, 3.0, -1.5];
        let bytes = embedding_to_bytes(&original);
        assert_eq!(bytes_to_embedding(&bytes), original);
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn self_retrieval_returns_top_one() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let x = chunk("x", "doc-1", "default", vec![1.0, 0.0, 0.0]);
        let y = chunk("y", "doc-1", "default", vec![0.0, 1.0, 0.0]);
        db.vector_store(&[x.clone(), y]).unwrap();

        let results = db.vector_search(&x.embedding, 1, None, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "x");
    }

    #[test]
    fn dimension_mismatch_within_established_collection_fails() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.vector_store(&[chunk("x", "doc-1", "default", vec![1.0, 0.0])])
            .unwrap();

        let err = db
            .vector_store(&[chunk("y", "doc-1", "default", vec![1.0, 0.0, 0.0])])
            .unwrap_err();
        assert!(matches!(err, RagoError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[test]
    fn different_collections_may_have_different_dimensions() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.vector_store(&[chunk("x", "doc-1", "one", vec![1.0, 0.0])])
            .unwrap();
        db.vector_store(&[chunk("y", "doc-2", "two", vec![1.0, 0.0, 0.0])])
            .unwrap();
    }

    #[test]
    fn top_k_zero_returns_empty() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.vector_store(&[chunk("x", "doc-1", "default", vec![1.0, 0.0])])
            .unwrap();
        assert!(db.vector_search(&[1.0, 0.0], 0, None, None).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_documents_chunks_and_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.vector_store(&[chunk("x", "doc-1", "default", vec![1.0, 0.0])])
            .unwrap();
        db.vector_delete("doc-1").unwrap();
        let results = db.vector_search(&[1.0, 0.0], 10, None, None).unwrap();
        assert!(results.iter().all(|c| c.document_id != "doc-1"));
        db.vector_delete("doc-1").unwrap();
    }

    #[test]
    fn reset_removes_every_collection() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.vector_store(&[chunk("x", "doc-1", "default", vec![1.0, 0.0])])
            .unwrap();
        db.vector_reset().unwrap();
        assert!(db.vector_search(&[1.0, 0.0], 10, None, None).unwrap().is_empty());
        db.vector_reset().unwrap();
    }

    #[test]
    fn metadata_filter_restricts_candidates() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let mut matching = chunk("x", "doc-1", "default", vec![1.0, 0.0]);
        matching
            .metadata
            .insert("kind".into(), metadata::MetadataValue::Text("keep".into()));
        let other = chunk("y", "doc-2", "default", vec![1.0, 0.0]);
        db.vector_store(&[matching, other]).unwrap();

        let mut filter = Metadata::new();
        filter.insert("kind".into(), metadata::MetadataValue::Text("keep".into()));
        let results = db.vector_search(&[1.0, 0.0], 10, None, Some(&filter)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "x");
    }
}
