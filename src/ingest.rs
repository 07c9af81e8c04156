//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for each changed document: extract → chunk →
//! embed → replace in graph and vector stores → mark processed. Unchanged
//! documents are skipped; deleted documents are removed from both stores.
//!
//! A failure on one document is recorded in the [`IngestReport`] and the
//! batch continues. The failed document is not marked processed, so the
//! next run picks it up again.
//!
//! With the embedding provider disabled, memory-mode ingestion writes the
//! graph only and retrieval runs on keyword search. Persistent stores refuse
//! that combination since later runs would skip the unembedded documents.

use anyhow::{bail, Result};

use crate::chunk::chunk_document;
use crate::config::{Config, StorageMode};
use crate::embedding::{embed_all, EmbeddingProvider};
use crate::error::Error;
use crate::extract::extract_sections;
use crate::models::{Chunk, Document, DocumentStatus};
use crate::storage::Storage;
use crate::tracker::{hash_bytes, Tracker};
use crate::vector::{PointPayload, VectorPoint};

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Forget all tracked hashes first, reprocessing every document.
    pub full: bool,
    /// Classify and estimate without writing anything.
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub new: usize,
    pub modified: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub documents_ingested: usize,
    pub chunks_written: usize,
    pub dry_run: bool,
    /// Set when no vectors were written (embedding disabled).
    pub graph_only: bool,
    pub errors: Vec<Error>,
}

impl IngestReport {
    pub fn print(&self) {
        if self.dry_run {
            println!("ingest (dry-run)");
        } else {
            println!("ingest");
        }
        println!("  new: {}", self.new);
        println!("  modified: {}", self.modified);
        println!("  unchanged: {}", self.unchanged);
        println!("  deleted: {}", self.deleted);
        if self.dry_run {
            println!("  estimated chunks: {}", self.chunks_written);
        } else {
            println!("  documents ingested: {}", self.documents_ingested);
            println!("  chunks written: {}", self.chunks_written);
        }
        if self.graph_only {
            println!("  vectors: skipped (embedding disabled)");
        }
        if self.errors.is_empty() {
            println!("ok");
        } else {
            println!("  errors: {}", self.errors.len());
            for e in &self.errors {
                println!("    {}", e);
            }
        }
    }
}

/// Outcome of [`reset`].
#[derive(Debug, Default)]
pub struct ResetReport {
    /// Tracker rows dropped.
    pub forgotten: u64,
    /// Documents gone from disk whose nodes and vectors were deleted.
    pub removed: usize,
    pub errors: Vec<Error>,
}

impl ResetReport {
    pub fn print(&self) {
        println!("reset");
        println!("  removed deleted documents: {}", self.removed);
        println!("  forgotten documents: {}", self.forgotten);
        if self.errors.is_empty() {
            println!("ok");
        } else {
            println!("  errors: {}", self.errors.len());
            for e in &self.errors {
                println!("    {}", e);
            }
        }
    }
}

/// Forget every tracked hash so the next ingest reprocesses all documents.
///
/// Documents that disappeared from disk are removed from both stores first:
/// once the tracker is empty nothing would ever classify them as deleted.
/// Documents that still exist keep their stored chunks until re-ingestion
/// replaces them.
pub async fn reset(config: &Config, tracker: &Tracker, storage: &Storage) -> Result<ResetReport> {
    let scan = tracker.scan(&config.documents).await?;
    let mut report = ResetReport::default();
    for entry in scan.with_status(DocumentStatus::Deleted) {
        match remove_document(tracker, storage, &entry.document).await {
            Ok(()) => {
                tracing::info!(path = %entry.document.path, "removed deleted document");
                report.removed += 1;
            }
            Err(e) => {
                tracing::warn!(path = %entry.document.path, error = %e, "removal failed");
                report.errors.push(e);
            }
        }
    }
    report.forgotten = tracker.clear().await?;
    Ok(report)
}

pub async fn run_ingest(
    config: &Config,
    tracker: &Tracker,
    storage: &Storage,
    embedder: &dyn EmbeddingProvider,
    options: IngestOptions,
) -> Result<IngestReport> {
    let mut purged = ResetReport::default();
    if options.full && !options.dry_run {
        purged = reset(config, tracker, storage).await?;
        tracing::info!(
            cleared = purged.forgotten,
            removed = purged.removed,
            "tracker cleared for full ingest"
        );
    }

    let scan = tracker.scan(&config.documents).await?;
    let mut report = IngestReport {
        new: scan.count(DocumentStatus::New),
        modified: scan.count(DocumentStatus::Modified),
        unchanged: scan.count(DocumentStatus::Unchanged),
        deleted: scan.count(DocumentStatus::Deleted) + purged.removed,
        dry_run: options.dry_run,
        ..Default::default()
    };
    report.errors.extend(purged.errors);
    report.errors.extend(scan.errors);

    if options.dry_run {
        for entry in &scan.entries {
            let wanted = entry.status.needs_ingest()
                || (options.full && entry.status == DocumentStatus::Unchanged);
            if !wanted {
                continue;
            }
            let chunks = read_document(config, &entry.document)
                .and_then(|bytes| prepare_chunks(config, &entry.document, &bytes));
            match chunks {
                Ok(chunks) => report.chunks_written += chunks.len(),
                Err(e) => report.errors.push(e),
            }
        }
        return Ok(report);
    }

    let embed = config.embedding.is_enabled();
    if !embed {
        if storage.mode == StorageMode::Persistent {
            bail!("embedding provider is disabled; set [embedding].provider to ingest into persistent stores");
        }
        tracing::warn!("embedding provider is disabled; indexing the graph only");
        report.graph_only = true;
    }

    storage.graph.ensure_schema().await?;
    if embed {
        storage.vector.ensure_collection(embedder.dims()).await?;
    }
    let embedder = embed.then_some(embedder);

    for entry in &scan.entries {
        match entry.status {
            DocumentStatus::New | DocumentStatus::Modified => {
                match ingest_document(config, tracker, storage, embedder, &entry.document).await {
                    Ok(count) => {
                        tracing::info!(
                            path = %entry.document.path,
                            status = entry.status.as_str(),
                            chunks = count,
                            "ingested document"
                        );
                        report.documents_ingested += 1;
                        report.chunks_written += count;
                    }
                    Err(e) => {
                        tracing::warn!(path = %entry.document.path, error = %e, "ingestion failed");
                        report.errors.push(e);
                    }
                }
            }
            DocumentStatus::Deleted => {
                if let Err(e) = remove_document(tracker, storage, &entry.document).await {
                    tracing::warn!(path = %entry.document.path, error = %e, "removal failed");
                    report.errors.push(e);
                } else {
                    tracing::info!(path = %entry.document.path, "removed deleted document");
                }
            }
            DocumentStatus::Unchanged => {
                tracing::debug!(path = %entry.document.path, "unchanged, skipped");
            }
        }
    }

    Ok(report)
}

fn read_document(config: &Config, doc: &Document) -> Result<Vec<u8>, Error> {
    std::fs::read(config.documents.root.join(&doc.path))
        .map_err(|e| Error::ingestion(&doc.path, e.to_string()))
}

fn prepare_chunks(config: &Config, doc: &Document, bytes: &[u8]) -> Result<Vec<Chunk>, Error> {
    let sections = extract_sections(doc.file_name(), bytes)
        .map_err(|e| Error::ingestion(&doc.path, e.to_string()))?;
    Ok(chunk_document(doc, &sections, &config.chunking))
}

/// Wrap any leaf error so the report names the document.
fn for_document(doc: &Document) -> impl Fn(Error) -> Error + '_ {
    move |e| match e {
        Error::Ingestion { .. } => e,
        other => Error::ingestion(&doc.path, other.to_string()),
    }
}

async fn ingest_document(
    config: &Config,
    tracker: &Tracker,
    storage: &Storage,
    embedder: Option<&dyn EmbeddingProvider>,
    scanned: &Document,
) -> Result<usize, Error> {
    let bytes = read_document(config, scanned)?;
    // The tracker must record the hash of the bytes actually chunked.
    let content_hash = hash_bytes(&bytes);
    let doc = if content_hash == scanned.content_hash {
        scanned.clone()
    } else {
        tracing::debug!(path = %scanned.path, "document changed since scan");
        Document {
            content_hash,
            size: bytes.len() as u64,
            ..scanned.clone()
        }
    };
    let doc = &doc;

    let chunks = prepare_chunks(config, doc, &bytes)?;

    let mut points = Vec::new();
    if let Some(embedder) = embedder {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_all(embedder, &texts, config.embedding.batch_size)
            .await
            .map_err(for_document(doc))?;
        points = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                id: chunk.id.clone(),
                vector,
                payload: PointPayload {
                    document_id: chunk.document_id.clone(),
                    document_path: chunk.document_path.clone(),
                    chunk_index: chunk.chunk_index,
                    section_title: chunk.section_title.clone(),
                },
            })
            .collect();

        // Replace, not merge: prior chunks of this document go first.
        storage
            .vector
            .delete_document(&doc.id)
            .await
            .map_err(for_document(doc))?;
    }
    storage
        .graph
        .upsert_document(doc)
        .await
        .map_err(for_document(doc))?;
    storage
        .graph
        .replace_chunks(doc, &chunks)
        .await
        .map_err(for_document(doc))?;
    storage
        .vector
        .upsert(&points)
        .await
        .map_err(for_document(doc))?;

    tracker
        .mark_processed(doc, chunks.len())
        .await
        .map_err(|e| Error::ingestion(&doc.path, format!("{:#}", e)))?;

    Ok(chunks.len())
}

async fn remove_document(tracker: &Tracker, storage: &Storage, doc: &Document) -> Result<(), Error> {
    storage
        .graph
        .delete_document(&doc.id)
        .await
        .map_err(for_document(doc))?;
    storage
        .vector
        .delete_document(&doc.id)
        .await
        .map_err(for_document(doc))?;
    tracker
        .forget(&doc.path)
        .await
        .map_err(|e| Error::ingestion(&doc.path, format!("{:#}", e)))
}
