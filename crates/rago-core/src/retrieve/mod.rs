//! Hybrid Retriever: fuses Vector Store and Keyword Store results by
//! Reciprocal Rank Fusion, a rank-based summation generalized down to a
//! plain two-list fusion (no reranking or query-expansion stage).

use std::collections::HashMap;

use crate::error::{RagoError, Result};
use crate::llm::Embedder;
use crate::store::{Database, Metadata};

/// A fused retrieval result: the winning chunk plus its combined RRF score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: Metadata,
    pub score: f32,
}

/// Tunables for RRF fusion. Ties beyond score are broken by ascending chunk
/// id only.
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    pub k: f32,
    pub relevance_threshold: f32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self {
            k: 10.0,
            relevance_threshold: 0.0,
        }
    }
}

/// A single query against the hybrid retriever.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub text: String,
    pub top_k: usize,
    pub collection: Option<String>,
    pub filter: Option<Metadata>,
}

/// Combines dense and keyword search over one database using an injected
/// Embedder.
pub struct HybridRetriever<'a> {
    db: &'a Database,
    config: RrfConfig,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(db: &'a Database, config: RrfConfig) -> Self {
        Self { db, config }
    }

    /// Embeds the query, searches both stores in parallel with a widened
    /// candidate pool, fuses by RRF, drops candidates below the relevance
    /// threshold, and truncates to `request.top_k`.
    pub async fn retrieve(
        &self,
        embedder: &dyn Embedder,
        request: &QueryRequest,
    ) -> Result<Vec<RetrievedChunk>> {
        if request.top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = embedder.embed(&request.text).await?;

        // Vector and keyword search run on their own blocking threads, each
        // over its own connection to the same database, so the two store
        // reads happen in parallel rather than one after the other.
        let vector_db = self.db.open_secondary()?;
        let top_k = request.top_k;
        let collection = request.collection.clone();
        let filter = request.filter.clone();
        let vector_query = query_vector.clone();
        let vector_task = tokio::task::spawn_blocking(move || {
            vector_db.vector_search(&vector_query, top_k, collection.as_deref(), filter.as_ref())
        });

        let keyword_db = self.db.open_secondary()?;
        let keyword_text = request.text.clone();
        let keyword_task =
            tokio::task::spawn_blocking(move || keyword_db.keyword_search(&keyword_text, top_k));

        let (vector_hits, keyword_hits) = tokio::try_join!(vector_task, keyword_task)
            .map_err(|err| RagoError::Fatal(format!("search task panicked: {err}")))?;
        let vector_hits = vector_hits?;
        let keyword_hits = keyword_hits?;

        let fused = fuse(&vector_hits, &keyword_hits, self.config.k);
        let mut results: Vec<RetrievedChunk> = fused
            .into_iter()
            .filter(|r| r.score >= self.config.relevance_threshold)
            .collect();
        results.truncate(request.top_k);
        Ok(results)
    }
}

/// Reciprocal Rank Fusion over a vector-search list and a keyword-search
/// list: each chunk's fused score is the sum of `1 / (k + rank)` across the
/// lists it appears in, where rank is 1-based within that list. Results are
/// ordered by descending fused score, ties broken by ascending chunk id.
fn fuse(
    vector_hits: &[crate::store::ScoredChunk],
    keyword_hits: &[crate::store::KeywordHit],
    k: f32,
) -> Vec<RetrievedChunk> {
    struct Entry {
        document_id: String,
        content: String,
        metadata: Metadata,
        score: f32,
    }

    let mut fused: HashMap<String, Entry> = HashMap::new();

    for (idx, hit) in vector_hits.iter().enumerate() {
        let rank = (idx + 1) as f32;
        let entry = fused.entry(hit.id.clone()).or_insert_with(|| Entry {
            document_id: hit.document_id.clone(),
            content: hit.content.clone(),
            metadata: hit.metadata.clone(),
            score: 0.0,
        });
        entry.score += 1.0 / (k + rank);
    }

    for (idx, hit) in keyword_hits.iter().enumerate() {
        let rank = (idx + 1) as f32;
        let entry = fused.entry(hit.id.clone()).or_insert_with(|| Entry {
            document_id: hit.document_id.clone(),
            content: hit.content.clone(),
            metadata: Metadata::new(),
            score: 0.0,
        });
        entry.score += 1.0 / (k + rank);
    }

    let mut results: Vec<RetrievedChunk> = fused
        .into_iter()
        .map(|(id, entry)| RetrievedChunk {
            id,
            document_id: entry.document_id,
            content: entry.content,
            metadata: entry.metadata,
            score: entry.score,
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeywordHit, ScoredChunk};

    fn vchunk(id: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            id: id.to_string(),
            document_id: format!("doc-{id}"),
            collection: "default".to_string(),
            chunk_index: 0,
            content: format!("vector content {id}"),
            metadata: Metadata::new(),
            score,
        }
    }

    fn khit(id: &str, score: f32) -> KeywordHit {
        KeywordHit {
            id: id.to_string(),
            document_id: format!("doc-{id}"),
            content: format!("keyword content {id}"),
            score,
        }
    }

    #[test]
    fn chunk_in_both_lists_outranks_single_list_hits() {
        let vector_hits = vec![vchunk("a", 0.9), vchunk("b", 0.8)];
        let keyword_hits = vec![khit("b", 5.0), khit("c", 4.0)];
        let fused = fuse(&vector_hits, &keyword_hits, 10.0);

        assert_eq!(fused[0].id, "b");
        let ids: Vec<&str> = fused.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"a"));
        assert!(ids.contains(&"c"));
    }

    #[test]
    fn equal_fused_scores_break_ties_by_ascending_id() {
        let vector_hits = vec![vchunk("z", 1.0)];
        let keyword_hits = vec![khit("a", 1.0)];
        let fused = fuse(&vector_hits, &keyword_hits, 10.0);
        assert_eq!(fused.len(), 2);
        assert!((fused[0].score - fused[1].score).abs() < 1e-9);
        assert_eq!(fused[0].id, "a");
    }

    #[test]
    fn only_in_one_list_still_contributes() {
        let vector_hits = vec![vchunk("solo", 0.5)];
        let fused = fuse(&vector_hits, &[], 10.0);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.0 / 11.0).abs() < 1e-6);
    }
}
