//! Keyword Store: an inverted full-text index over chunk content, using
//! `documents_fts USING fts5(...)` / `bm25()` ranking.

use rusqlite::params;

use crate::error::Result;

use super::metadata;
use super::schema::Database;
use super::ChunkRecord;

/// A chunk returned by a keyword search, with its BM25-derived score.
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub score: f32,
}

impl Database {
    /// Indexes chunks into the full-text index, inserting their backing
    /// `chunks` row if absent. Re-indexing the same chunk id replaces it.
    pub fn keyword_index(&self, chunks: &[ChunkRecord]) -> Result<()> {
        self.conn.execute("BEGIN IMMEDIATE", [])?;
        let result: Result<()> = (|| {
            for chunk in chunks {
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
                    "DELETE FROM chunks_fts WHERE chunk_id = ?1",
                    params![chunk.id],
                )?;
                self.conn.execute(
                    "INSERT INTO chunks_fts (content, chunk_id, document_id) VALUES (?1, ?2, ?3)",
                    params![chunk.content, chunk.id, chunk.document_id],
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

    /// Returns up to `top_k` chunks scored by the FTS5 BM25 relevance function.
    /// `bm25()` yields lower-is-better scores; results are negated so that,
    /// like the vector store, higher scores rank first.
    pub fn keyword_search(&self, query: &str, top_k: usize) -> Result<Vec<KeywordHit>> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT chunk_id, document_id, content, bm25(chunks_fts) AS rank
             FROM chunks_fts WHERE chunks_fts MATCH ?1
             ORDER BY rank LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![sanitized, top_k as i64], |row| {
            Ok(KeywordHit {
                id: row.get(0)?,
                document_id: row.get(1)?,
                content: row.get(2)?,
                score: -row.get::<_, f64>(3)? as f32,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Removes this document's hits from the keyword index (idempotent: a
    /// document with no hits is not an error).
    pub fn keyword_delete(&self, document_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM chunks_fts WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(())
    }

    /// Destroys and recreates an empty full-text index.
    pub fn keyword_reset(&self) -> Result<()> {
        self.conn.execute("DELETE FROM chunks_fts", [])?;
        Ok(())
    }
}

/// Escapes FTS5 query-syntax characters so arbitrary user text can be used as
/// a MATCH argument without tripping the query parser.
fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| {
            let cleaned: String = term.chars().filter(|c| c.is_alphanumeric()).collect();
            cleaned
        })
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}
