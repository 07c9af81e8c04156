//! Vector store abstraction.
//!
//! Points are keyed by chunk id (the same id as the graph's chunk node) and
//! carry a small payload so results can be attributed without a graph
//! round-trip. Search ranks by cosine similarity, best first.

pub mod memory;
pub mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::InMemoryVectorStore;
pub use qdrant::QdrantStore;

/// Payload stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub document_id: String,
    pub document_path: String,
    pub chunk_index: i64,
    #[serde(default)]
    pub section_title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// A search result: chunk id plus cosine score.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub payload: Option<PointPayload>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn ping(&self) -> Result<()>;

    /// Create the collection for `dims`-dimensional cosine vectors if absent.
    async fn ensure_collection(&self, dims: usize) -> Result<()>;

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()>;

    /// Remove every point whose payload `document_id` matches.
    async fn delete_document(&self, document_id: &str) -> Result<()>;

    /// Top `top_k` points by cosine similarity, descending. Points scoring
    /// below `score_threshold` are omitted.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<VectorHit>>;

    async fn count(&self) -> Result<u64>;
}
