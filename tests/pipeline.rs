//! End-to-end ingestion and retrieval against the in-memory stores.
//!
//! These tests build a small corpus on disk (`.docx` with heading styles and
//! Markdown), ingest it with the offline hashing embedder, and check the
//! properties the stores must keep across runs.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use graphrag_testgen::agent::{self, Generator};
use graphrag_testgen::config::{parse_config, Config};
use graphrag_testgen::db;
use graphrag_testgen::embedding::{EmbeddingProvider, HashProvider};
use graphrag_testgen::error::Result as DomainResult;
use graphrag_testgen::ingest::{reset, run_ingest, IngestOptions, IngestReport};
use graphrag_testgen::models::{Document, HitOrigin};
use graphrag_testgen::retrieve::Retriever;
use graphrag_testgen::storage::Storage;
use graphrag_testgen::tracker::Tracker;

// ─── Fixtures ───────────────────────────────────────────────────────

fn docx_bytes(paragraphs: &[(Option<&str>, &str)]) -> Vec<u8> {
    let mut body = String::new();
    for (style, text) in paragraphs {
        body.push_str("<w:p>");
        if let Some(style) = style {
            body.push_str(&format!(r#"<w:pPr><w:pStyle w:val="{}"/></w:pPr>"#, style));
        }
        body.push_str(&format!("<w:r><w:t>{}</w:t></w:r></w:p>", text));
    }

    let mut buf = std::io::Cursor::new(Vec::new());
    let mut zip = zip::ZipWriter::new(&mut buf);
    zip.start_file("word/document.xml", SimpleFileOptions::default())
        .unwrap();
    write!(
        zip,
        r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
        body
    )
    .unwrap();
    zip.finish().unwrap();
    buf.into_inner()
}

fn write_login_prd(root: &Path) {
    let bytes = docx_bytes(&[
        (Some("Title"), "Login PRD"),
        (Some("Heading1"), "Login API"),
        (
            None,
            "The login endpoint accepts an email and password. Invalid credentials return HTTP 401 with an error message.",
        ),
        (
            None,
            "After five failed login attempts with invalid credentials the account is locked for fifteen minutes.",
        ),
        (Some("Heading1"), "Session"),
        (
            None,
            "A successful login issues a session cookie that expires after thirty minutes of inactivity.",
        ),
    ]);
    fs::write(root.join("Login_PRD.docx"), bytes).unwrap();
}

fn write_billing_notes(root: &Path) {
    fs::write(
        root.join("billing.md"),
        "# Invoices\n\nInvoices are generated monthly and emailed to the billing contact.\n\n\
         # Refunds\n\nRefunds are issued to the original payment method within ten days.",
    )
    .unwrap();
}

fn config(root: &Path) -> Config {
    parse_config(&format!(
        r#"
[documents]
root = "{}"
include_globs = ["**/*.docx", "**/*.md"]

[chunking]
max_tokens = 40
overlap_tokens = 5

[embedding]
provider = "hash"
dims = 256

[generation]
provider = "disabled"

[storage]
mode = "memory"

[retrieval]
top_k = 3
expand = true
expand_hops = 1
max_context_chunks = 10

[server]
bind = "127.0.0.1:0"
"#,
        root.display()
    ))
    .unwrap()
}

struct Harness {
    _tmp: TempDir,
    root: std::path::PathBuf,
    cfg: Config,
    tracker: Tracker,
    storage: Storage,
    embedder: Arc<HashProvider>,
}

impl Harness {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        let cfg = config(&root);
        let tracker = Tracker::from_pool(db::connect_in_memory().await.unwrap())
            .await
            .unwrap();
        Self {
            _tmp: tmp,
            root,
            cfg,
            tracker,
            storage: Storage::in_memory(),
            embedder: Arc::new(HashProvider::new(256)),
        }
    }

    async fn ingest(&self) -> IngestReport {
        let report = run_ingest(
            &self.cfg,
            &self.tracker,
            &self.storage,
            self.embedder.as_ref(),
            IngestOptions::default(),
        )
        .await
        .unwrap();
        assert!(report.errors.is_empty(), "ingest errors: {:?}", report.errors);
        report
    }

    async fn chunk_ids(&self, path: &str) -> Vec<String> {
        self.storage
            .graph
            .document_chunk_ids(&Document::id_for_path(path))
            .await
            .unwrap()
    }

    fn retriever(&self) -> Retriever {
        Retriever::new(
            self.storage.clone(),
            self.embedder.clone(),
            self.cfg.retrieval.clone(),
        )
    }
}

/// Builds one test case per context block, echoing the block's content into
/// the step action, and counts how often it was asked.
struct EchoGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl Generator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, prompt: &str) -> DomainResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let cases: Vec<serde_json::Value> = prompt
            .lines()
            .filter_map(|l| l.strip_prefix("Content: "))
            .map(|content| {
                serde_json::json!({
                    "title": "Context check",
                    "summary": "Derived from retrieved documentation",
                    "test_type": "api",
                    "priority": "high",
                    "steps": [{ "action": content, "expected_result": "Behaves as documented" }]
                })
            })
            .collect();
        Ok(serde_json::json!({ "test_cases": cases }).to_string())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn reingesting_unchanged_corpus_is_a_no_op() {
    let h = Harness::new().await;
    write_login_prd(&h.root);
    write_billing_notes(&h.root);

    let first = h.ingest().await;
    assert_eq!(first.new, 2);
    assert_eq!(first.documents_ingested, 2);
    let vectors = h.storage.vector.count().await.unwrap();
    let stats = h.storage.graph.stats().await.unwrap();
    let login_ids = h.chunk_ids("Login_PRD.docx").await;

    let second = h.ingest().await;
    assert_eq!(second.unchanged, 2);
    assert_eq!(second.documents_ingested, 0);
    assert_eq!(second.chunks_written, 0);
    assert_eq!(h.storage.vector.count().await.unwrap(), vectors);
    assert_eq!(h.storage.graph.stats().await.unwrap(), stats);
    assert_eq!(h.chunk_ids("Login_PRD.docx").await, login_ids);
}

#[tokio::test]
async fn modified_document_is_replaced_and_unchanged_one_kept() {
    let h = Harness::new().await;
    write_login_prd(&h.root);
    write_billing_notes(&h.root);
    h.ingest().await;

    let a_before = h.chunk_ids("Login_PRD.docx").await;
    let b_before = h.chunk_ids("billing.md").await;
    assert!(!a_before.is_empty());
    assert!(!b_before.is_empty());

    let bytes = docx_bytes(&[
        (Some("Heading1"), "Login API"),
        (None, "Login now requires a one-time code sent by SMS."),
    ]);
    fs::write(h.root.join("Login_PRD.docx"), bytes).unwrap();

    let report = h.ingest().await;
    assert_eq!(report.modified, 1);
    assert_eq!(report.unchanged, 1);

    let a_after = h.chunk_ids("Login_PRD.docx").await;
    let b_after = h.chunk_ids("billing.md").await;
    assert_eq!(b_after, b_before);
    assert!(!a_after.is_empty());

    let before: HashSet<&String> = a_before.iter().collect();
    assert!(a_after.iter().all(|id| !before.contains(id)));
    assert!(h.storage.graph.get_chunks(&a_before).await.unwrap().is_empty());

    let chunks = h.storage.graph.get_chunks(&a_after).await.unwrap();
    assert!(chunks.iter().any(|c| c.text.contains("one-time code")));
    assert!(chunks.iter().all(|c| !c.text.contains("fifteen minutes")));

    let total = a_after.len() + b_after.len();
    assert_eq!(h.storage.vector.count().await.unwrap(), total as u64);
}

#[tokio::test]
async fn every_vector_hit_resolves_to_a_graph_chunk() {
    let h = Harness::new().await;
    write_login_prd(&h.root);
    write_billing_notes(&h.root);
    h.ingest().await;

    let all = h.storage.vector.count().await.unwrap() as usize;
    for query in ["invalid credentials", "refund payment", "session cookie", "unrelated"] {
        let vector = h.embedder.embed(query).await.unwrap();
        let hits = h.storage.vector.search(&vector, all, None).await.unwrap();
        assert_eq!(hits.len(), all);
        let ids: Vec<String> = hits.iter().map(|hit| hit.id.clone()).collect();
        let chunks = h.storage.graph.get_chunks(&ids).await.unwrap();
        assert_eq!(chunks.len(), ids.len(), "query {:?}", query);
    }
}

#[tokio::test]
async fn retrieval_orders_direct_hits_before_expansion() {
    let h = Harness::new().await;
    write_login_prd(&h.root);
    write_billing_notes(&h.root);
    h.ingest().await;

    let ctx = h
        .retriever()
        .retrieve("Login API should handle invalid credentials", 3)
        .await
        .unwrap();
    assert!(!ctx.degraded);
    assert!(!ctx.is_empty());
    assert!(ctx.chunks.len() <= 10);

    let first_graph = ctx
        .chunks
        .iter()
        .position(|c| c.origin == HitOrigin::Graph)
        .unwrap_or(ctx.chunks.len());
    assert!(ctx.chunks[..first_graph]
        .iter()
        .all(|c| c.origin == HitOrigin::Vector));
    assert!(ctx.chunks[first_graph..]
        .iter()
        .all(|c| c.origin == HitOrigin::Graph && c.score.is_none()));

    let scores: Vec<f32> = ctx.chunks[..first_graph]
        .iter()
        .filter_map(|c| c.score)
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]), "scores: {:?}", scores);

    let ids: HashSet<&str> = ctx.chunks.iter().map(|c| c.chunk.id.as_str()).collect();
    assert_eq!(ids.len(), ctx.chunks.len());

    assert_eq!(ctx.chunks[0].chunk.document_path, "Login_PRD.docx");
    assert_eq!(ctx.chunks[0].chunk.section_title.as_deref(), Some("Login API"));
}

#[tokio::test]
async fn login_query_yields_test_cases_about_credentials() {
    let h = Harness::new().await;
    write_login_prd(&h.root);
    write_billing_notes(&h.root);
    h.ingest().await;

    let query = "Login API should handle invalid credentials";
    let ctx = h.retriever().retrieve(query, 3).await.unwrap();
    let generator = EchoGenerator {
        calls: AtomicUsize::new(0),
    };
    let suite = agent::generate(&generator, query, &ctx).await.unwrap();

    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(suite.query, query);
    assert!(suite.total_count >= 1);
    assert_eq!(suite.total_count, suite.test_cases.len());
    assert!(suite.test_cases.iter().any(|tc| tc.steps.iter().any(|s| {
        let action = s.action.to_lowercase();
        action.contains("login") || action.contains("credentials")
    })));
}

#[tokio::test]
async fn deleting_a_document_removes_its_chunks_everywhere() {
    let h = Harness::new().await;
    write_login_prd(&h.root);
    write_billing_notes(&h.root);
    h.ingest().await;
    let billing = h.chunk_ids("billing.md").await;

    fs::remove_file(h.root.join("billing.md")).unwrap();
    let report = h.ingest().await;
    assert_eq!(report.deleted, 1);

    assert!(h.chunk_ids("billing.md").await.is_empty());
    assert!(h.storage.graph.get_chunks(&billing).await.unwrap().is_empty());
    let remaining = h.chunk_ids("Login_PRD.docx").await.len() as u64;
    assert_eq!(h.storage.vector.count().await.unwrap(), remaining);
    assert_eq!(h.storage.graph.stats().await.unwrap().documents, 1);
}

#[tokio::test]
async fn full_ingest_drops_documents_deleted_from_disk() {
    let h = Harness::new().await;
    write_login_prd(&h.root);
    write_billing_notes(&h.root);
    h.ingest().await;
    let billing = h.chunk_ids("billing.md").await;
    assert!(!billing.is_empty());

    fs::remove_file(h.root.join("billing.md")).unwrap();
    let report = run_ingest(
        &h.cfg,
        &h.tracker,
        &h.storage,
        h.embedder.as_ref(),
        IngestOptions {
            full: true,
            dry_run: false,
        },
    )
    .await
    .unwrap();
    assert!(report.errors.is_empty(), "ingest errors: {:?}", report.errors);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.documents_ingested, 1);

    assert!(h.chunk_ids("billing.md").await.is_empty());
    assert!(h.storage.graph.get_chunks(&billing).await.unwrap().is_empty());
    let remaining = h.chunk_ids("Login_PRD.docx").await.len() as u64;
    assert_eq!(h.storage.vector.count().await.unwrap(), remaining);
    assert_eq!(h.storage.graph.stats().await.unwrap().documents, 1);
}

#[tokio::test]
async fn reset_then_ingest_leaves_no_stale_chunks() {
    let h = Harness::new().await;
    write_login_prd(&h.root);
    write_billing_notes(&h.root);
    h.ingest().await;
    let login = h.chunk_ids("Login_PRD.docx").await;

    fs::remove_file(h.root.join("billing.md")).unwrap();
    let cleared = reset(&h.cfg, &h.tracker, &h.storage).await.unwrap();
    assert_eq!(cleared.removed, 1);
    assert_eq!(cleared.forgotten, 1);
    assert!(h.chunk_ids("billing.md").await.is_empty());

    let report = h.ingest().await;
    assert_eq!(report.new, 1);
    assert_eq!(report.deleted, 0);
    // Same content, same ids: the re-ingested document replaces itself.
    assert_eq!(h.chunk_ids("Login_PRD.docx").await, login);
    assert_eq!(h.storage.vector.count().await.unwrap(), login.len() as u64);
}
