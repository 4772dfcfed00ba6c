//! Document Store, Vector Store, and Keyword Store, sharing one `rusqlite`
//! database handle.

pub mod conversation;
pub mod document;
pub mod execution;
pub mod keyword;
pub mod metadata;
pub mod schema;
pub mod vector;

pub use document::Document;
pub use keyword::KeywordHit;
pub use metadata::{Metadata, MetadataValue};
pub use schema::Database;
pub use vector::ScoredChunk;

use self::metadata::Metadata as MetadataMap;

/// A chunk as persisted by the ingestion pipeline: owning document, ordered
/// position, content, inherited+extended metadata, and dense vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub collection: String,
    pub chunk_index: usize,
    pub content: String,
    pub metadata: MetadataMap,
    pub embedding: Vec<f32>,
    pub created_at: String,
}
