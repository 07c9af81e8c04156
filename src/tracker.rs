//! Document change tracking.
//!
//! Fingerprints every candidate file under the documents root with SHA-256
//! and compares it to the hash recorded when the file was last ingested.
//! Files are classified as new, modified or unchanged; tracked paths that
//! disappeared are reported as deleted. Unchanged files are skipped by the
//! ingest pipeline, which makes re-ingestion incremental and idempotent.
//!
//! A file that cannot be read becomes an [`Error::Ingestion`] entry in the
//! report and does not stop the scan.

use anyhow::{bail, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::{Config, DocumentsConfig};
use crate::db;
use crate::error::Error;
use crate::migrate;
use crate::models::{DocType, Document, DocumentStatus};

/// One classified document from a scan. Contents are re-read at ingest time.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub document: Document,
    pub status: DocumentStatus,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub entries: Vec<ScanEntry>,
    pub errors: Vec<Error>,
}

impl ScanReport {
    pub fn count(&self, status: DocumentStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn with_status(&self, status: DocumentStatus) -> impl Iterator<Item = &ScanEntry> {
        self.entries.iter().filter(move |e| e.status == status)
    }
}

/// A row of the tracker table.
#[derive(Debug, Clone)]
pub struct TrackedDocument {
    pub path: String,
    pub document_id: String,
    pub doc_type: DocType,
    pub content_hash: String,
    pub size: u64,
    pub modified_at: i64,
    pub chunk_count: i64,
    pub last_processed: i64,
}

impl TrackedDocument {
    fn to_document(&self) -> Document {
        Document {
            id: self.document_id.clone(),
            path: self.path.clone(),
            doc_type: self.doc_type,
            content_hash: self.content_hash.clone(),
            size: self.size,
            modified_at: self.modified_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerStats {
    pub total_documents: usize,
    pub total_chunks: i64,
    pub last_updated: Option<i64>,
    pub tracked_paths: Vec<String>,
}

pub struct Tracker {
    pool: SqlitePool,
}

impl Tracker {
    /// Open (and migrate) the tracker database selected by the config.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Classify every candidate file under the documents root.
    pub async fn scan(&self, docs: &DocumentsConfig) -> Result<ScanReport> {
        let root = &docs.root;
        if !root.exists() {
            bail!("Documents root does not exist: {}", root.display());
        }

        let include_set = build_globset(&docs.include_globs)?;
        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/~$*".to_string(), // Word lock files
        ];
        default_excludes.extend(docs.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes)?;

        let mut tracked: HashMap<String, TrackedDocument> = self
            .tracked()
            .await?
            .into_iter()
            .map(|t| (t.path.clone(), t))
            .collect();

        let mut report = ScanReport::default();

        let walker = WalkDir::new(root).follow_links(docs.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| root.display().to_string());
                    report.errors.push(Error::ingestion(path, e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let rel_str = relative_path(root, path);

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }

            // Even an unreadable file still exists; keep it out of `deleted`.
            let previous = tracked.remove(&rel_str);

            let (content_hash, size, modified_at) = match fingerprint(path) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(path = %rel_str, error = %e, "unreadable document");
                    report.errors.push(Error::ingestion(&rel_str, e.to_string()));
                    continue;
                }
            };

            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let document = Document {
                id: Document::id_for_path(&rel_str),
                path: rel_str.clone(),
                doc_type: DocType::from_file_name(&file_name),
                content_hash,
                size,
                modified_at,
            };

            let status = match previous {
                None => DocumentStatus::New,
                Some(prev) if prev.content_hash != document.content_hash => {
                    DocumentStatus::Modified
                }
                Some(_) => DocumentStatus::Unchanged,
            };

            tracing::debug!(path = %rel_str, status = status.as_str(), "classified document");

            report.entries.push(ScanEntry { document, status });
        }

        // Whatever is left in the tracker was not found on disk.
        let mut deleted: Vec<TrackedDocument> = tracked.into_values().collect();
        deleted.sort_by(|a, b| a.path.cmp(&b.path));
        for t in deleted {
            report.entries.push(ScanEntry {
                document: t.to_document(),
                status: DocumentStatus::Deleted,
            });
        }

        // Sort for deterministic ordering
        report
            .entries
            .sort_by(|a, b| a.document.path.cmp(&b.document.path));

        Ok(report)
    }

    /// Record a successfully ingested document.
    pub async fn mark_processed(&self, doc: &Document, chunk_count: usize) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO tracked_documents
                (path, document_id, doc_type, content_hash, size, modified_at, chunk_count, last_processed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                document_id = excluded.document_id,
                doc_type = excluded.doc_type,
                content_hash = excluded.content_hash,
                size = excluded.size,
                modified_at = excluded.modified_at,
                chunk_count = excluded.chunk_count,
                last_processed = excluded.last_processed
            "#,
        )
        .bind(&doc.path)
        .bind(&doc.id)
        .bind(doc.doc_type.as_str())
        .bind(&doc.content_hash)
        .bind(doc.size as i64)
        .bind(doc.modified_at)
        .bind(chunk_count as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.touch(now).await
    }

    /// Drop a deleted document from the tracker.
    pub async fn forget(&self, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM tracked_documents WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        self.touch(Utc::now().timestamp()).await
    }

    /// Forget everything, forcing the next run to reprocess all documents.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tracked_documents")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM tracker_meta WHERE key = 'last_updated'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn tracked(&self) -> Result<Vec<TrackedDocument>> {
        let rows = sqlx::query(
            "SELECT path, document_id, doc_type, content_hash, size, modified_at, chunk_count, last_processed \
             FROM tracked_documents ORDER BY path",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let doc_type: String = row.get("doc_type");
                let size: i64 = row.get("size");
                TrackedDocument {
                    path: row.get("path"),
                    document_id: row.get("document_id"),
                    doc_type: DocType::parse(&doc_type),
                    content_hash: row.get("content_hash"),
                    size: size as u64,
                    modified_at: row.get("modified_at"),
                    chunk_count: row.get("chunk_count"),
                    last_processed: row.get("last_processed"),
                }
            })
            .collect())
    }

    pub async fn stats(&self) -> Result<TrackerStats> {
        let tracked = self.tracked().await?;
        let last_updated: Option<String> =
            sqlx::query_scalar("SELECT value FROM tracker_meta WHERE key = 'last_updated'")
                .fetch_optional(&self.pool)
                .await?;

        Ok(TrackerStats {
            total_documents: tracked.len(),
            total_chunks: tracked.iter().map(|t| t.chunk_count).sum(),
            last_updated: last_updated.and_then(|s| s.parse::<i64>().ok()),
            tracked_paths: tracked.into_iter().map(|t| t.path).collect(),
        })
    }

    async fn touch(&self, ts: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tracker_meta (key, value) VALUES ('last_updated', ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(ts.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Lowercase hex SHA-256.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Stream the file through SHA-256; returns (hash, size, mtime secs).
fn fingerprint(path: &Path) -> std::io::Result<(String, u64, i64)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut file, &mut hasher)?;
    let modified = file
        .metadata()?
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let modified_secs = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    Ok((hex::encode(hasher.finalize()), size, modified_secs))
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn docs_config(root: &Path) -> DocumentsConfig {
        DocumentsConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.txt".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
        }
    }

    async fn tracker() -> Tracker {
        Tracker::from_pool(db::connect_in_memory().await.unwrap())
            .await
            .unwrap()
    }

    fn status_of(report: &ScanReport, path: &str) -> DocumentStatus {
        report
            .entries
            .iter()
            .find(|e| e.document.path == path)
            .map(|e| e.status)
            .unwrap_or_else(|| panic!("{} not in report", path))
    }

    #[tokio::test]
    async fn classifies_new_unchanged_modified_deleted() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
        fs::write(tmp.path().join("b.txt"), "beta").unwrap();
        fs::write(tmp.path().join("ignored.md"), "not included").unwrap();
        let cfg = docs_config(tmp.path());
        let tracker = tracker().await;

        let first = tracker.scan(&cfg).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.count(DocumentStatus::New), 2);
        for e in &first.entries {
            let contents = fs::read(tmp.path().join(&e.document.path)).unwrap();
            assert_eq!(e.document.content_hash, hash_bytes(&contents));
            assert_eq!(e.document.size, contents.len() as u64);
            tracker.mark_processed(&e.document, 1).await.unwrap();
        }

        let second = tracker.scan(&cfg).await.unwrap();
        assert_eq!(second.count(DocumentStatus::Unchanged), 2);

        fs::write(tmp.path().join("a.txt"), "alpha v2").unwrap();
        fs::remove_file(tmp.path().join("b.txt")).unwrap();
        fs::write(tmp.path().join("c.txt"), "gamma").unwrap();

        let third = tracker.scan(&cfg).await.unwrap();
        assert_eq!(status_of(&third, "a.txt"), DocumentStatus::Modified);
        assert_eq!(status_of(&third, "b.txt"), DocumentStatus::Deleted);
        assert_eq!(status_of(&third, "c.txt"), DocumentStatus::New);
    }

    #[tokio::test]
    async fn touching_without_content_change_is_unchanged() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        fs::write(&file, "same").unwrap();
        let cfg = docs_config(tmp.path());
        let tracker = tracker().await;

        for e in &tracker.scan(&cfg).await.unwrap().entries {
            tracker.mark_processed(&e.document, 1).await.unwrap();
        }
        fs::write(&file, "same").unwrap();

        let report = tracker.scan(&cfg).await.unwrap();
        assert_eq!(status_of(&report, "a.txt"), DocumentStatus::Unchanged);
    }

    #[tokio::test]
    async fn clear_forces_reprocessing() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
        let cfg = docs_config(tmp.path());
        let tracker = tracker().await;

        for e in &tracker.scan(&cfg).await.unwrap().entries {
            tracker.mark_processed(&e.document, 3).await.unwrap();
        }
        let stats = tracker.stats().await.unwrap();
        assert_eq!(stats.total_documents, 1);
        assert_eq!(stats.total_chunks, 3);
        assert!(stats.last_updated.is_some());

        assert_eq!(tracker.clear().await.unwrap(), 1);
        let report = tracker.scan(&cfg).await.unwrap();
        assert_eq!(status_of(&report, "a.txt"), DocumentStatus::New);
    }

    #[tokio::test]
    async fn forget_removes_deleted_document() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
        let cfg = docs_config(tmp.path());
        let tracker = tracker().await;
        for e in &tracker.scan(&cfg).await.unwrap().entries {
            tracker.mark_processed(&e.document, 1).await.unwrap();
        }
        fs::remove_file(tmp.path().join("a.txt")).unwrap();

        let report = tracker.scan(&cfg).await.unwrap();
        assert_eq!(report.count(DocumentStatus::Deleted), 1);
        tracker.forget("a.txt").await.unwrap();

        let report = tracker.scan(&cfg).await.unwrap();
        assert!(report.entries.is_empty());
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let tracker = tracker().await;
        let cfg = docs_config(Path::new("/definitely/not/here"));
        assert!(tracker.scan(&cfg).await.is_err());
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
