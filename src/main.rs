//! # Test Generator CLI (`testgen`)
//!
//! ## Usage
//!
//! ```bash
//! testgen --config ./config/testgen.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `testgen init` | Create the tracker database and the graph/vector schema |
//! | `testgen status` | Show tracked documents and store counts |
//! | `testgen reset` | Drop documents deleted from disk, then forget all tracked hashes |
//! | `testgen ingest` | Ingest new and modified documents, remove deleted ones |
//! | `testgen search "<query>"` | Print the retrieval context for a query |
//! | `testgen generate "<query>"` | Generate a test suite as JSON |
//! | `testgen serve` | Start the HTTP API and UI |
//! | `testgen verify` | Check graph, vector, embedding and generation services |
//!
//! ## Examples
//!
//! ```bash
//! # Preview what an ingest would do
//! testgen ingest --dry-run
//!
//! # Reprocess every document
//! testgen ingest --full
//!
//! # Generate and export for Xray import
//! testgen generate "Password reset flow" --k 8 --export ./out/xray.json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use graphrag_testgen::agent::{self, create_generator};
use graphrag_testgen::config::{self, Config, StorageMode};
use graphrag_testgen::embedding::{create_provider, EmbeddingProvider};
use graphrag_testgen::export;
use graphrag_testgen::ingest::{self, run_ingest, IngestOptions};
use graphrag_testgen::logging;
use graphrag_testgen::retrieve::Retriever;
use graphrag_testgen::server;
use graphrag_testgen::storage::Storage;
use graphrag_testgen::tracker::Tracker;
use graphrag_testgen::verify;

/// GraphRAG test generator: documents in, test cases out.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/testgen.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "testgen",
    about = "Generate test cases from product documents with graph-augmented retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/testgen.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the tracker database and the store schema. Idempotent.
    Init,

    /// Show tracked documents, last update time and store counts.
    Status,

    /// Forget all tracked document hashes.
    ///
    /// Documents deleted from disk are removed from the stores first. Chunks
    /// of the remaining documents stay until the next `ingest` replaces them.
    Reset,

    /// Ingest documents from `documents.root`.
    Ingest {
        /// Reprocess every document, not just new and modified ones.
        #[arg(long)]
        full: bool,

        /// Show classification and chunk estimates without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the retrieval context for a query.
    Search {
        query: String,

        /// Number of direct vector hits (defaults to `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Generate a test suite for a query and print it as JSON.
    Generate {
        query: String,

        #[arg(long)]
        k: Option<usize>,

        /// Also write the suite as Xray import JSON to this path.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Start the HTTP server (`/`, `/generate-tests`, `/health`).
    ///
    /// In memory storage mode the document folder is ingested first.
    Serve,

    /// Check connectivity of every external dependency.
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level)?;

    match cli.command {
        Commands::Init => run_init(&cfg).await?,
        Commands::Status => run_status(&cfg).await?,
        Commands::Reset => {
            let storage = Storage::open(&cfg).await?;
            let tracker = storage.open_tracker(&cfg).await?;
            ingest::reset(&cfg, &tracker, &storage).await?.print();
        }
        Commands::Ingest { full, dry_run } => {
            let storage = Storage::open(&cfg).await?;
            let tracker = storage.open_tracker(&cfg).await?;
            let embedder = create_provider(&cfg.embedding)?;
            let report = run_ingest(
                &cfg,
                &tracker,
                &storage,
                embedder.as_ref(),
                IngestOptions { full, dry_run },
            )
            .await?;
            report.print();
            if storage.mode == StorageMode::Memory {
                println!("note: memory storage does not outlive this command");
            }
        }
        Commands::Search { query, k } => run_search(&cfg, &query, k).await?,
        Commands::Generate { query, k, export } => {
            run_generate(&cfg, &query, k, export).await?
        }
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Verify => {
            let report = verify::run_verify(&cfg).await?;
            report.print();
            if !report.all_passed() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn run_init(cfg: &Config) -> Result<()> {
    let storage = Storage::open(cfg).await?;
    let tracker = Tracker::open(cfg).await?;
    let stats = tracker.stats().await?;
    storage.graph.ensure_schema().await?;

    println!("init");
    println!("  storage: {}", storage.mode_name());
    println!("  tracked documents: {}", stats.total_documents);
    if cfg.embedding.is_enabled() {
        let embedder = create_provider(&cfg.embedding)?;
        storage.vector.ensure_collection(embedder.dims()).await?;
        println!("  vector dims: {}", embedder.dims());
    }
    println!("ok");
    Ok(())
}

async fn run_status(cfg: &Config) -> Result<()> {
    let tracker = Tracker::open(cfg).await?;
    let stats = tracker.stats().await?;

    println!("status");
    println!("  tracked documents: {}", stats.total_documents);
    println!("  tracked chunks: {}", stats.total_chunks);
    match stats.last_updated {
        Some(ts) => println!(
            "  last updated: {}",
            chrono::DateTime::from_timestamp(ts, 0)
                .map(|d| d.to_rfc3339())
                .unwrap_or_else(|| ts.to_string())
        ),
        None => println!("  last updated: never"),
    }
    for path in &stats.tracked_paths {
        println!("    {}", path);
    }

    if cfg.storage.mode == StorageMode::Memory {
        println!("  storage: memory (stores are populated by `serve`)");
        return Ok(());
    }

    let storage = Storage::connect(cfg)?;
    println!("  storage: {}", storage.mode_name());
    match storage.graph.stats().await {
        Ok(s) => println!(
            "  graph: {} documents, {} chunks, {} sections",
            s.documents, s.chunks, s.sections
        ),
        Err(e) => println!("  graph: unavailable ({})", e),
    }
    match storage.vector.count().await {
        Ok(n) => println!("  vectors: {}", n),
        Err(e) => println!("  vectors: unavailable ({})", e),
    }
    Ok(())
}

/// Open stores and the embedder; memory stores are filled from the
/// document folder first since they start empty.
async fn open_retriever(cfg: &Config) -> Result<Retriever> {
    let storage = Storage::open(cfg).await?;
    let embedder: Arc<dyn EmbeddingProvider> = create_provider(&cfg.embedding)?;
    if storage.mode == StorageMode::Memory {
        let tracker = storage.open_tracker(cfg).await?;
        let report = run_ingest(
            cfg,
            &tracker,
            &storage,
            embedder.as_ref(),
            IngestOptions::default(),
        )
        .await?;
        tracing::info!(
            documents = report.documents_ingested,
            chunks = report.chunks_written,
            errors = report.errors.len(),
            "ingested into memory stores"
        );
    }
    Ok(Retriever::new(storage, embedder, cfg.retrieval.clone()))
}

async fn run_search(cfg: &Config, query: &str, k: Option<usize>) -> Result<()> {
    let query = query.trim();
    if query.is_empty() {
        println!("No results.");
        return Ok(());
    }
    let retriever = open_retriever(cfg).await?;
    let k = k.unwrap_or_else(|| retriever.default_k());
    let context = retriever.retrieve(query, k).await?;

    if context.degraded {
        println!("(degraded: keyword search)");
    }
    if context.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, sc) in context.chunks.iter().enumerate() {
        let score = sc
            .score
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}. [{:?} {}] {} #{} {}",
            i + 1,
            sc.origin,
            score,
            sc.chunk.document_path,
            sc.chunk.chunk_index,
            sc.chunk.section_title.as_deref().unwrap_or("")
        );
        let preview: String = sc.chunk.text.chars().take(160).collect();
        println!("   {}", preview.replace('\n', " "));
    }
    Ok(())
}

async fn run_generate(
    cfg: &Config,
    query: &str,
    k: Option<usize>,
    export_path: Option<PathBuf>,
) -> Result<()> {
    let query = query.trim();
    if query.is_empty() {
        anyhow::bail!("query must not be empty");
    }
    let generator = create_generator(&cfg.generation)?;
    let retriever = open_retriever(cfg).await?;
    let k = k.unwrap_or_else(|| retriever.default_k());

    let context = retriever.retrieve(query, k).await?;
    let suite = agent::generate(generator.as_ref(), query, &context).await?;
    let response = server::GenerateResponse {
        suite,
        degraded: context.degraded,
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    if let Some(path) = export_path {
        export::write_xray(&response.suite, Some(&path))?;
    }
    Ok(())
}
