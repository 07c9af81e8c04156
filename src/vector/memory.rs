//! In-memory [`VectorStore`]: brute-force cosine over an insertion-ordered
//! `Vec` behind `std::sync::RwLock`.

use std::sync::RwLock;

use async_trait::async_trait;

use super::{VectorHit, VectorPoint, VectorStore};
use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};

pub struct InMemoryVectorStore {
    points: RwLock<Vec<VectorPoint>>,
    dims: RwLock<Option<usize>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(Vec::new()),
            dims: RwLock::new(None),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::store("memory vector", "lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &'static str {
        "memory vector"
    }

    async fn ping(&self) -> Result<()> {
        self.points.read().map(|_| ()).map_err(poisoned)
    }

    async fn ensure_collection(&self, dims: usize) -> Result<()> {
        let mut current = self.dims.write().map_err(poisoned)?;
        match *current {
            Some(existing) if existing != dims => Err(Error::store(
                self.name(),
                format!("collection has {} dims, requested {}", existing, dims),
            )),
            _ => {
                *current = Some(dims);
                Ok(())
            }
        }
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        if let Some(dims) = *self.dims.read().map_err(poisoned)? {
            if let Some(bad) = points.iter().find(|p| p.vector.len() != dims) {
                return Err(Error::store(
                    self.name(),
                    format!("point {} has {} dims, expected {}", bad.id, bad.vector.len(), dims),
                ));
            }
        }

        let mut stored = self.points.write().map_err(poisoned)?;
        for point in points {
            match stored.iter_mut().find(|p| p.id == point.id) {
                Some(existing) => *existing = point.clone(),
                None => stored.push(point.clone()),
            }
        }
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.points
            .write()
            .map_err(poisoned)?
            .retain(|p| p.payload.document_id != document_id);
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<VectorHit>> {
        let stored = self.points.read().map_err(poisoned)?;

        let mut hits: Vec<VectorHit> = stored
            .iter()
            .map(|p| VectorHit {
                id: p.id.clone(),
                score: cosine_similarity(query, &p.vector),
                payload: Some(p.payload.clone()),
            })
            .filter(|h| score_threshold.map_or(true, |t| h.score >= t))
            .collect();

        // Stable sort: equal scores keep insertion order.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.points.read().map_err(poisoned)?.len() as u64)
    }
}
