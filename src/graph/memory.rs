//! In-memory [`GraphStore`] for `memory` storage mode and tests.
//!
//! Uses `HashMap`s behind a single `std::sync::RwLock`. `NEXT` edges are
//! implicit in each document's index-ordered chunk list; `PART_OF` edges are
//! the section membership maps.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{keyword_terms, section_id, GraphStats, GraphStore};
use crate::error::{Error, Result};
use crate::models::{Chunk, Document};

#[derive(Default)]
struct Inner {
    documents: HashMap<String, Document>,
    chunks: HashMap<String, Chunk>,
    /// Document id → chunk ids in index order.
    document_chunks: HashMap<String, Vec<String>>,
    /// Section id → member chunk ids.
    sections: HashMap<String, Vec<String>>,
    chunk_section: HashMap<String, String>,
}

impl Inner {
    fn remove_chunks_of(&mut self, document_id: &str) {
        if let Some(ids) = self.document_chunks.remove(document_id) {
            for id in ids {
                self.chunks.remove(&id);
                if let Some(section) = self.chunk_section.remove(&id) {
                    self.sections.remove(&section);
                }
            }
        }
    }

    /// Chunk ids one edge away from `id` (NEXT either way, or via its section).
    fn chunk_edges(&self, id: &str) -> Vec<Node> {
        let mut out = Vec::new();
        if let Some(chunk) = self.chunks.get(id) {
            if let Some(ids) = self.document_chunks.get(&chunk.document_id) {
                if let Some(pos) = ids.iter().position(|c| c == id) {
                    if pos > 0 {
                        out.push(Node::Chunk(ids[pos - 1].clone()));
                    }
                    if let Some(next) = ids.get(pos + 1) {
                        out.push(Node::Chunk(next.clone()));
                    }
                }
            }
        }
        if let Some(section) = self.chunk_section.get(id) {
            out.push(Node::Section(section.clone()));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Node {
    Chunk(String),
    Section(String),
}

pub struct InMemoryGraph {
    inner: RwLock<Inner>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::store("memory graph", "lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::store("memory graph", "lock poisoned"))
    }
}

impl Default for InMemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_chunks(chunks: &mut [Chunk]) {
    chunks.sort_by(|a, b| {
        a.document_path
            .cmp(&b.document_path)
            .then(a.chunk_index.cmp(&b.chunk_index))
    });
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    fn name(&self) -> &'static str {
        "memory graph"
    }

    async fn ping(&self) -> Result<()> {
        self.read().map(|_| ())
    }

    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        self.write()?.documents.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn replace_chunks(&self, doc: &Document, chunks: &[Chunk]) -> Result<()> {
        let mut inner = self.write()?;
        inner.documents.insert(doc.id.clone(), doc.clone());
        inner.remove_chunks_of(&doc.id);

        let mut ordered: Vec<&Chunk> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.chunk_index);

        let mut ids = Vec::with_capacity(ordered.len());
        for chunk in ordered {
            if let Some(title) = &chunk.section_title {
                let sid = section_id(&doc.id, title);
                inner
                    .sections
                    .entry(sid.clone())
                    .or_default()
                    .push(chunk.id.clone());
                inner.chunk_section.insert(chunk.id.clone(), sid);
            }
            inner.chunks.insert(chunk.id.clone(), chunk.clone());
            ids.push(chunk.id.clone());
        }
        inner.document_chunks.insert(doc.id.clone(), ids);
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        let mut inner = self.write()?;
        inner.remove_chunks_of(document_id);
        inner.documents.remove(document_id);
        Ok(())
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.chunks.get(id).cloned())
            .collect())
    }

    async fn document_chunk_ids(&self, document_id: &str) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .document_chunks
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn neighbors(&self, ids: &[String], hops: usize) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        let inputs: HashSet<&str> = ids.iter().map(String::as_str).collect();

        let mut seen: HashSet<Node> = HashSet::new();
        let mut queue: VecDeque<(Node, usize)> = VecDeque::new();
        for id in ids {
            if inner.chunks.contains_key(id) {
                let node = Node::Chunk(id.clone());
                seen.insert(node.clone());
                queue.push_back((node, 0));
            }
        }

        let mut found = Vec::new();
        while let Some((node, depth)) = queue.pop_front() {
            if depth >= hops {
                continue;
            }
            let edges = match &node {
                Node::Chunk(id) => inner.chunk_edges(id),
                Node::Section(sid) => inner
                    .sections
                    .get(sid)
                    .map(|m| m.iter().cloned().map(Node::Chunk).collect())
                    .unwrap_or_default(),
            };
            for next in edges {
                if !seen.insert(next.clone()) {
                    continue;
                }
                if let Node::Chunk(id) = &next {
                    if !inputs.contains(id.as_str()) {
                        if let Some(chunk) = inner.chunks.get(id) {
                            found.push(chunk.clone());
                        }
                    }
                }
                queue.push_back((next, depth + 1));
            }
        }

        sort_chunks(&mut found);
        Ok(found)
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<(Chunk, f32)>> {
        let terms = keyword_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let inner = self.read()?;

        let mut scored: Vec<(Chunk, f32)> = inner
            .chunks
            .values()
            .filter_map(|chunk| {
                let text = chunk.text.to_lowercase();
                let hits = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (hits > 0).then(|| (chunk.clone(), hits as f32 / terms.len() as f32))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.document_path.cmp(&b.0.document_path))
                .then(a.0.chunk_index.cmp(&b.0.chunk_index))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn stats(&self) -> Result<GraphStats> {
        let inner = self.read()?;
        Ok(GraphStats {
            documents: inner.documents.len() as u64,
            chunks: inner.chunks.len() as u64,
            sections: inner.sections.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_id;
    use crate::models::DocType;

    fn doc(path: &str) -> Document {
        Document {
            id: Document::id_for_path(path),
            path: path.to_string(),
            doc_type: DocType::Other,
            content_hash: "h".into(),
            size: 1,
            modified_at: 0,
        }
    }

    fn chunk(doc: &Document, index: i64, section: Option<&str>, text: &str) -> Chunk {
        Chunk {
            id: chunk_id(&doc.id, &doc.content_hash, index),
            document_id: doc.id.clone(),
            document_path: doc.path.clone(),
            doc_type: doc.doc_type,
            chunk_index: index,
            section_title: section.map(str::to_string),
            text: text.to_string(),
            hash: format!("h{}", index),
        }
    }

    async fn seeded() -> (InMemoryGraph, Document, Vec<Chunk>) {
        let g = InMemoryGraph::new();
        let d = doc("login.docx");
        let chunks = vec![
            chunk(&d, 0, Some("Login"), "Users log in with email and password"),
            chunk(&d, 1, Some("Login"), "Invalid credentials return 401"),
            chunk(&d, 2, Some("Login"), "Accounts lock after five failures"),
            chunk(&d, 3, Some("Logout"), "Logout revokes the session token"),
            chunk(&d, 4, None, "Appendix"),
        ];
        g.upsert_document(&d).await.unwrap();
        g.replace_chunks(&d, &chunks).await.unwrap();
        (g, d, chunks)
    }

    #[tokio::test]
    async fn replace_swaps_all_chunks() {
        let (g, d, old) = seeded().await;
        let new = vec![chunk(&d, 0, Some("Login"), "Rewritten")];
        g.replace_chunks(&d, &new).await.unwrap();

        let ids = g.document_chunk_ids(&d.id).await.unwrap();
        assert_eq!(ids, vec![new[0].id.clone()]);
        let fetched = g.get_chunks(&[old[3].id.clone()]).await.unwrap();
        assert!(fetched.is_empty());
        let stats = g.stats().await.unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.sections, 1);
    }

    #[tokio::test]
    async fn one_hop_follows_next_edges_only() {
        let (g, _, c) = seeded().await;
        let n = g.neighbors(&[c[1].id.clone()], 1).await.unwrap();
        let idx: Vec<i64> = n.iter().map(|c| c.chunk_index).collect();
        assert_eq!(idx, vec![0, 2]);
    }

    #[tokio::test]
    async fn two_hops_reach_section_siblings() {
        let (g, _, c) = seeded().await;
        let n = g.neighbors(&[c[0].id.clone()], 2).await.unwrap();
        let idx: Vec<i64> = n.iter().map(|c| c.chunk_index).collect();
        assert_eq!(idx, vec![1, 2]);
    }

    #[tokio::test]
    async fn neighbors_exclude_inputs_and_unknown_ids() {
        let (g, _, c) = seeded().await;
        let n = g
            .neighbors(&[c[3].id.clone(), c[4].id.clone(), "missing".into()], 1)
            .await
            .unwrap();
        let idx: Vec<i64> = n.iter().map(|c| c.chunk_index).collect();
        assert_eq!(idx, vec![2]);
        assert!(g.neighbors(&[c[0].id.clone()], 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keyword_search_ranks_by_matched_terms() {
        let (g, _, _) = seeded().await;
        let hits = g
            .keyword_search("invalid credentials on login", 3)
            .await
            .unwrap();
        assert_eq!(hits[0].0.chunk_index, 1);
        assert!(hits[0].1 > hits.last().unwrap().1 || hits.len() == 1);
        assert!(g.keyword_search("zz", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_document_removes_everything() {
        let (g, d, _) = seeded().await;
        g.delete_document(&d.id).await.unwrap();
        assert_eq!(g.stats().await.unwrap(), GraphStats::default());
    }
}
