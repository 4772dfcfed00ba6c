//! Document Store: document-level metadata such as path, URL, tags, and
//! timestamps.

use chrono::Utc;
use rusqlite::params;

use crate::error::{RagoError, Result};

use super::metadata::{self, Metadata};
use super::schema::Database;

/// A stored document. Content is immutable after creation; metadata may be
/// augmented in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub path: Option<String>,
    pub url: Option<String>,
    pub content: String,
    pub metadata: Metadata,
    pub created_at: String,
    pub updated_at: String,
}

impl Database {
    /// Inserts or replaces a document by id.
    pub fn put_document(&self, doc: &Document) -> Result<()> {
        let metadata_json = metadata::to_json(&doc.metadata)?;
        self.conn.execute(
            "INSERT INTO documents (id, collection, path, url, content, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                collection = excluded.collection,
                path = excluded.path,
                url = excluded.url,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at",
            params![
                doc.id,
                doc.collection,
                doc.path,
                doc.url,
                doc.content,
                metadata_json,
                doc.created_at,
                doc.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Fetches a document by id.
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let result = self.conn.query_row(
            "SELECT id, collection, path, url, content, metadata, created_at, updated_at
             FROM documents WHERE id = ?1",
            params![id],
            row_to_document,
        );
        match result {
            Ok(doc) => Ok(Some(doc)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists documents, optionally scoped to a single collection.
    pub fn list_documents(&self, collection: Option<&str>) -> Result<Vec<Document>> {
        let mut stmt = match collection {
            Some(_) => self.conn.prepare(
                "SELECT id, collection, path, url, content, metadata, created_at, updated_at
                 FROM documents WHERE collection = ?1 ORDER BY id",
            )?,
            None => self.conn.prepare(
                "SELECT id, collection, path, url, content, metadata, created_at, updated_at
                 FROM documents ORDER BY id",
            )?,
        };

        let rows = match collection {
            Some(c) => stmt.query_map(params![c], row_to_document)?,
            None => stmt.query_map([], row_to_document)?,
        };
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Merges `extra` metadata into an existing document's metadata.
    pub fn augment_document_metadata(&self, id: &str, extra: &Metadata) -> Result<()> {
        let doc = self
            .get_document(id)?
            .ok_or_else(|| RagoError::NotFound(format!("document {id}")))?;
        let merged = metadata::merge(&doc.metadata, extra);
        let metadata_json = metadata::to_json(&merged)?;
        self.conn.execute(
            "UPDATE documents SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
            params![metadata_json, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Deletes a document and all of its chunks/embeddings (idempotent).
    pub fn delete_document(&self, id: &str) -> Result<()> {
        self.conn.execute("BEGIN IMMEDIATE", [])?;
        let result: Result<()> = (|| {
            self.conn
                .execute("DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?1)", params![id])?;
            self.conn.execute(
                "DELETE FROM chunks_fts WHERE document_id = ?1",
                params![id],
            )?;
            self.conn
                .execute("DELETE FROM chunks WHERE document_id = ?1", params![id])?;
            self.conn
                .execute("DELETE FROM documents WHERE id = ?1", params![id])?;
            Ok(())
        })();
        if result.is_ok() {
            self.conn.execute("COMMIT", [])?;
        } else {
            let _ = self.conn.execute("ROLLBACK", []);
        }
        result
    }

    /// Removes every document (and transitively every chunk/embedding).
    pub fn reset_documents(&self) -> Result<()> {
        self.conn.execute_batch(
            "DELETE FROM embeddings;
             DELETE FROM chunks_fts;
             DELETE FROM chunks;
             DELETE FROM documents;",
        )?;
        Ok(())
    }
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let metadata_json: String = row.get(5)?;
    let metadata = metadata::from_json(&metadata_json).unwrap_or_default();
    Ok(Document {
        id: row.get(0)?,
        collection: row.get(1)?,
        path: row.get(2)?,
        url: row.get(3)?,
        content: row.get(4)?,
        metadata,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
