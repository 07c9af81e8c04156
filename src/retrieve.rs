//! Hybrid retrieval: vector similarity followed by graph expansion.
//!
//! ```text
//! query ──embed──▶ vector search (top k) ──ids──▶ graph lookup
//!                                                   │
//!                             neighbors within expand_hops
//!                                                   ▼
//!                       direct hits (score desc) + expanded (doc, index)
//! ```
//!
//! When the vector path is unavailable (vector store down, or no embedding
//! provider configured), retrieval degrades to the graph's keyword search and
//! flags the context as `degraded`. If the graph fails as well the request
//! fails. A failed embedding API call is a [`Error::RemoteService`] and is
//! returned to the caller as is.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::models::{HitOrigin, ScoredChunk};
use crate::storage::Storage;

/// Ordered chunks assembled for one query.
#[derive(Debug, Clone)]
pub struct RetrievalContext {
    pub chunks: Vec<ScoredChunk>,
    /// True when the vector path was unavailable and keyword search was used.
    pub degraded: bool,
}

impl RetrievalContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Prompt-ready context: one `Source / Section / Content` block per chunk.
    pub fn render(&self) -> String {
        self.chunks
            .iter()
            .map(|sc| {
                format!(
                    "Source: {}\nSection: {}\nContent: {}",
                    sc.chunk.document_path,
                    sc.chunk.section_title.as_deref().unwrap_or("N/A"),
                    sc.chunk.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}

pub struct Retriever {
    storage: Storage,
    embedder: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(storage: Storage, embedder: Arc<dyn EmbeddingProvider>, config: RetrievalConfig) -> Self {
        Self {
            storage,
            embedder,
            config,
        }
    }

    pub fn default_k(&self) -> usize {
        self.config.top_k
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalContext> {
        let k = k.max(1);
        let (mut direct, degraded) = match self.vector_hits(query, k).await {
            Ok(hits) => (hits, false),
            Err(e @ Error::RemoteService { .. }) => return Err(e),
            Err(vector_err) => {
                let reason = Error::RetrievalDegraded(vector_err.to_string());
                tracing::warn!(error = %reason, "falling back to keyword search");
                let hits = self
                    .storage
                    .graph
                    .keyword_search(query, k)
                    .await
                    .map_err(|graph_err| {
                        Error::RetrievalDegraded(format!(
                            "{}; keyword fallback failed: {}",
                            vector_err, graph_err
                        ))
                    })?;
                let hits = hits
                    .into_iter()
                    .map(|(chunk, score)| ScoredChunk {
                        chunk,
                        score: Some(score),
                        origin: HitOrigin::Keyword,
                    })
                    .collect();
                (hits, true)
            }
        };

        // Stable: equal scores keep backend order.
        direct.sort_by(|a, b| {
            b.score
                .unwrap_or(f32::MIN)
                .partial_cmp(&a.score.unwrap_or(f32::MIN))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut seen: HashSet<String> = HashSet::new();
        direct.retain(|sc| seen.insert(sc.chunk.id.clone()));
        direct.truncate(self.config.max_context_chunks);

        let mut chunks = direct;
        if self.config.expand && self.config.expand_hops > 0 && !chunks.is_empty() {
            let room = self.config.max_context_chunks.saturating_sub(chunks.len());
            if room > 0 {
                let ids: Vec<String> = chunks.iter().map(|sc| sc.chunk.id.clone()).collect();
                let expanded = self
                    .storage
                    .graph
                    .neighbors(&ids, self.config.expand_hops)
                    .await?;
                chunks.extend(
                    expanded
                        .into_iter()
                        .filter(|c| seen.insert(c.id.clone()))
                        .take(room)
                        .map(|chunk| ScoredChunk {
                            chunk,
                            score: None,
                            origin: HitOrigin::Graph,
                        }),
                );
            }
        }

        tracing::debug!(
            chunks = chunks.len(),
            degraded,
            "retrieval complete"
        );
        Ok(RetrievalContext { chunks, degraded })
    }

    /// Embed, search, then join hits to their graph nodes by id.
    async fn vector_hits(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let vector = self.embedder.embed(query).await?;
        let hits = self
            .storage
            .vector
            .search(&vector, k, self.config.score_threshold)
            .await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
        let chunks = self.storage.graph.get_chunks(&ids).await?;

        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            match chunks.iter().find(|c| c.id == hit.id) {
                Some(chunk) => out.push(ScoredChunk {
                    chunk: chunk.clone(),
                    score: Some(hit.score),
                    origin: HitOrigin::Vector,
                }),
                None => tracing::warn!(chunk_id = %hit.id, "vector hit has no graph node; dropped"),
            }
        }
        Ok(out)
    }
}
