//! Graph store abstraction.
//!
//! The graph holds the document structure the vector index cannot express:
//!
//! ```text
//! (:Document)-[:CONTAINS]->(:Chunk)-[:NEXT]->(:Chunk)
//!                            (:Chunk)-[:PART_OF]->(:Section)
//! ```
//!
//! Chunk nodes are keyed by the same id as their vector points, so every
//! vector hit joins back to its graph node. Neighbor expansion walks `NEXT`
//! and `PART_OF` edges in either direction; same-section siblings are two
//! hops apart (chunk → section → chunk).
//!
//! Implementations must be `Send + Sync`; the server shares one instance
//! behind an `Arc` across requests.

pub mod memory;
pub mod neo4j;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::{Chunk, Document};

pub use memory::InMemoryGraph;
pub use neo4j::Neo4jGraph;

/// Node counts reported by `/health` and `testgen status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub documents: u64,
    pub chunks: u64,
    pub sections: u64,
}

/// Abstract graph backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_schema`](GraphStore::ensure_schema) | Create uniqueness constraints |
/// | [`upsert_document`](GraphStore::upsert_document) | Idempotent document node write |
/// | [`replace_chunks`](GraphStore::replace_chunks) | Swap a document's chunks, edges and sections |
/// | [`delete_document`](GraphStore::delete_document) | Remove a document and everything it owns |
/// | [`get_chunks`](GraphStore::get_chunks) | Resolve chunk ids to nodes |
/// | [`neighbors`](GraphStore::neighbors) | Chunks within `hops` of the inputs |
/// | [`keyword_search`](GraphStore::keyword_search) | Term match for degraded retrieval |
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    async fn ping(&self) -> Result<()>;

    async fn ensure_schema(&self) -> Result<()>;

    async fn upsert_document(&self, doc: &Document) -> Result<()>;

    /// Delete the document's prior chunks and sections, then write the new
    /// ones. Replaces rather than merges.
    async fn replace_chunks(&self, doc: &Document, chunks: &[Chunk]) -> Result<()>;

    async fn delete_document(&self, document_id: &str) -> Result<()>;

    /// Chunks for the given ids; unknown ids are omitted.
    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>>;

    /// Chunk ids of one document in index order.
    async fn document_chunk_ids(&self, document_id: &str) -> Result<Vec<String>>;

    /// Chunks within `hops` edges of any input, excluding the inputs,
    /// ordered by document path then chunk index.
    async fn neighbors(&self, ids: &[String], hops: usize) -> Result<Vec<Chunk>>;

    /// Chunks containing query terms, scored by the fraction of terms
    /// matched, best first.
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<(Chunk, f32)>>;

    async fn stats(&self) -> Result<GraphStats>;
}

const STOPWORDS: &[&str] = &[
    "and", "are", "for", "from", "has", "have", "should", "that", "the", "this", "with", "when",
    "will", "into", "not", "can", "all", "any", "was", "were", "its",
];

/// Lowercase search terms of a query: alphanumeric runs of 3+ characters,
/// stopwords removed, first occurrence order.
pub fn keyword_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in query.split(|c: char| !c.is_alphanumeric()) {
        let term = raw.to_lowercase();
        if term.chars().count() < 3 || STOPWORDS.contains(&term.as_str()) {
            continue;
        }
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Section node id: one section per `(document, title)`.
pub fn section_id(document_id: &str, title: &str) -> String {
    format!("{}#{}", document_id, title)
}
