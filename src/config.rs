//! TOML configuration.
//!
//! All settings live in one file (`--config`, default `./config/testgen.toml`).
//! Secrets never appear in the file; they are read from the environment
//! (optionally populated from `.env`) by the adapters that need them:
//!
//! | Variable | Used by |
//! |----------|---------|
//! | `GEMINI_API_KEY` | Gemini embedding and generation providers |
//! | `OPENAI_API_KEY` | OpenAI embedding and generation providers |
//! | `NEO4J_PASSWORD` | Neo4j graph store |
//! | `QDRANT_API_KEY` | Qdrant vector store in `managed` mode |
//!
//! Storage selection is explicit: `storage.mode` picks `persistent` or
//! `memory`, and each persistent connection names its `kind`. Nothing is
//! inferred from which variables happen to be set, and contradictory
//! settings are rejected by [`load_config`].

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.docx".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// SQLite file holding per-document hashes. Ignored in `memory` mode.
    #[serde(default = "default_tracker_path")]
    pub path: PathBuf,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            path: default_tracker_path(),
        }
    }
}

fn default_tracker_path() -> PathBuf {
    PathBuf::from("./data/tracker.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default)]
    pub overlap_tokens: usize,
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Disabled,
    /// Deterministic local hashing embedding. No network; for development.
    Hash,
    Gemini,
    OpenAI,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Overrides the provider's API base URL.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Disabled,
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: 0,
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::Disabled
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != EmbeddingProviderKind::Disabled
    }
}

// ============ Generation ============

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProviderKind {
    Disabled,
    Gemini,
    OpenAI,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: GenerationProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            temperature: default_temperature(),
            max_retries: 0,
            timeout_secs: default_generation_timeout_secs(),
            url: None,
        }
    }
}

fn default_generation_provider() -> GenerationProviderKind {
    GenerationProviderKind::Gemini
}
fn default_temperature() -> f32 {
    0.2
}
fn default_generation_timeout_secs() -> u64 {
    60
}

// ============ Storage ============

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Neo4j + Qdrant.
    Persistent,
    /// Process-local stores; everything is re-ingested on start.
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub mode: StorageMode,
    #[serde(default)]
    pub graph: Option<GraphConnection>,
    #[serde(default)]
    pub vector: Option<VectorConnection>,
    /// Select the memory stores once at startup when the persistent ones
    /// do not answer a ping.
    #[serde(default)]
    pub fallback_to_memory: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GraphKind {
    /// Neo4j Desktop / self-managed server.
    Local,
    /// Neo4j Aura.
    Managed,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct GraphConnection {
    pub kind: GraphKind,
    /// HTTP(S) endpoint of the server, e.g. `http://localhost:7474`.
    pub url: String,
    #[serde(default = "default_neo4j_database")]
    pub database: String,
    #[serde(default = "default_neo4j_username")]
    pub username: String,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_neo4j_database() -> String {
    "neo4j".to_string()
}
fn default_neo4j_username() -> String {
    "neo4j".to_string()
}
fn default_store_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VectorKind {
    /// Docker / self-hosted Qdrant, no API key.
    SelfHosted,
    /// Qdrant Cloud, requires `QDRANT_API_KEY`.
    Managed,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct VectorConnection {
    pub kind: VectorKind,
    /// REST endpoint, e.g. `http://localhost:6333`.
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_collection() -> String {
    "document_chunks".to_string()
}

// ============ Retrieval / server / logging ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub score_threshold: Option<f32>,
    #[serde(default = "default_expand")]
    pub expand: bool,
    #[serde(default = "default_expand_hops")]
    pub expand_hops: usize,
    #[serde(default = "default_max_context_chunks")]
    pub max_context_chunks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: None,
            expand: default_expand(),
            expand_hops: default_expand_hops(),
            max_context_chunks: default_max_context_chunks(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_expand() -> bool {
    true
}
fn default_expand_hops() -> usize {
    1
}
fn default_max_context_chunks() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============ Loading ============

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }

    // Embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is {:?}",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none()
            && config.embedding.provider != EmbeddingProviderKind::Hash
        {
            bail!(
                "embedding.model must be specified when provider is {:?}",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    // Retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_context_chunks < config.retrieval.top_k {
        bail!("retrieval.max_context_chunks must be >= retrieval.top_k");
    }
    if let Some(t) = config.retrieval.score_threshold {
        if !(-1.0..=1.0).contains(&t) {
            bail!("retrieval.score_threshold must be in [-1.0, 1.0]");
        }
    }

    crate::logging::parse_level(&config.logging.level)
        .with_context(|| "logging.level is invalid")?;

    validate_storage(&config.storage)
}

fn validate_storage(storage: &StorageConfig) -> Result<()> {
    match storage.mode {
        StorageMode::Memory => {
            if storage.graph.is_some() || storage.vector.is_some() {
                bail!(
                    "storage.mode = \"memory\" cannot be combined with [storage.graph] or \
                     [storage.vector]; remove them or use mode = \"persistent\""
                );
            }
            if storage.fallback_to_memory {
                bail!("storage.fallback_to_memory only applies to mode = \"persistent\"");
            }
        }
        StorageMode::Persistent => {
            let graph = storage
                .graph
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("storage.mode = \"persistent\" requires [storage.graph]"))?;
            let vector = storage.vector.as_ref().ok_or_else(|| {
                anyhow::anyhow!("storage.mode = \"persistent\" requires [storage.vector]")
            })?;
            validate_graph(graph)?;
            validate_vector(vector)?;
        }
    }
    Ok(())
}

fn validate_graph(graph: &GraphConnection) -> Result<()> {
    let (scheme, host) = split_url(&graph.url)
        .ok_or_else(|| anyhow::anyhow!("storage.graph.url is not a valid http(s) URL: {}", graph.url))?;
    let managed_host = host.ends_with(".neo4j.io");
    match graph.kind {
        GraphKind::Managed => {
            if scheme != "https" {
                bail!("storage.graph.kind = \"managed\" requires an https URL");
            }
            if is_loopback(host) {
                bail!("storage.graph.kind = \"managed\" cannot point at {}", host);
            }
        }
        GraphKind::Local => {
            if managed_host {
                bail!(
                    "storage.graph.url points at a managed Neo4j host ({}); set kind = \"managed\"",
                    host
                );
            }
        }
    }
    if graph.database.trim().is_empty() {
        bail!("storage.graph.database must not be empty");
    }
    if graph.timeout_secs == 0 {
        bail!("storage.graph.timeout_secs must be > 0");
    }
    Ok(())
}

fn validate_vector(vector: &VectorConnection) -> Result<()> {
    let (scheme, host) = split_url(&vector.url).ok_or_else(|| {
        anyhow::anyhow!("storage.vector.url is not a valid http(s) URL: {}", vector.url)
    })?;
    match vector.kind {
        VectorKind::Managed => {
            if scheme != "https" {
                bail!("storage.vector.kind = \"managed\" requires an https URL");
            }
            if is_loopback(host) {
                bail!("storage.vector.kind = \"managed\" cannot point at {}", host);
            }
        }
        VectorKind::SelfHosted => {
            if host.ends_with(".cloud.qdrant.io") {
                bail!(
                    "storage.vector.url points at Qdrant Cloud ({}); set kind = \"managed\"",
                    host
                );
            }
        }
    }
    if vector.collection.trim().is_empty() {
        bail!("storage.vector.collection must not be empty");
    }
    if vector.timeout_secs == 0 {
        bail!("storage.vector.timeout_secs must be > 0");
    }
    Ok(())
}

/// Returns `(scheme, host)` for `http`/`https` URLs.
fn split_url(url: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme != "http" && scheme != "https" {
        return None;
    }
    let authority = rest.split('/').next().unwrap_or_default();
    let host = authority.rsplit_once(':').map(|(h, _)| h).unwrap_or(authority);
    if host.is_empty() {
        return None;
    }
    Some((scheme, host))
}

fn is_loopback(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host == "[::1]"
}
