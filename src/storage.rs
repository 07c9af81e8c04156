//! Store selection.
//!
//! The graph and vector backends are chosen once, at startup, from
//! `storage.mode`. Persistent stores are pinged when opened. If the ping
//! fails and `storage.fallback_to_memory = true`, the in-memory pair is
//! selected instead; otherwise opening fails. No later call ever switches
//! backends.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{Config, StorageMode};
use crate::db;
use crate::graph::{GraphStore, InMemoryGraph, Neo4jGraph};
use crate::tracker::Tracker;
use crate::vector::{InMemoryVectorStore, QdrantStore, VectorStore};

#[derive(Clone)]
pub struct Storage {
    /// Effective mode after any fallback.
    pub mode: StorageMode,
    pub graph: Arc<dyn GraphStore>,
    pub vector: Arc<dyn VectorStore>,
}

impl Storage {
    pub fn in_memory() -> Self {
        Self {
            mode: StorageMode::Memory,
            graph: Arc::new(InMemoryGraph::new()),
            vector: Arc::new(InMemoryVectorStore::new()),
        }
    }

    /// Open the configured stores, checking that persistent ones answer.
    pub async fn open(config: &Config) -> Result<Self> {
        let storage = Self::connect(config)?;
        if storage.mode == StorageMode::Memory {
            tracing::info!("using in-memory graph and vector stores");
            return Ok(storage);
        }

        match storage.ping().await {
            Ok(()) => Ok(storage),
            Err(e) if config.storage.fallback_to_memory => {
                tracing::warn!(error = %e, "persistent stores unreachable; falling back to in-memory stores");
                Ok(Self::in_memory())
            }
            Err(e) => Err(anyhow::Error::new(e).context(
                "persistent stores unreachable (set storage.fallback_to_memory = true to run on in-memory stores)",
            )),
        }
    }

    /// Build the configured adapters without contacting them.
    pub fn connect(config: &Config) -> Result<Self> {
        let storage = &config.storage;
        if storage.mode == StorageMode::Memory {
            return Ok(Self::in_memory());
        }

        let graph_conn = storage
            .graph
            .as_ref()
            .context("storage.graph is required in persistent mode")?;
        let vector_conn = storage
            .vector
            .as_ref()
            .context("storage.vector is required in persistent mode")?;

        Ok(Self {
            mode: StorageMode::Persistent,
            graph: Arc::new(Neo4jGraph::new(graph_conn)?),
            vector: Arc::new(QdrantStore::new(vector_conn)?),
        })
    }

    /// Open the tracker matching the effective mode. In-memory stores get an
    /// in-memory tracker, also after a fallback, so the tracker never claims
    /// documents the stores do not hold.
    pub async fn open_tracker(&self, config: &Config) -> Result<Tracker> {
        match self.mode {
            StorageMode::Memory => Tracker::from_pool(db::connect_in_memory().await?).await,
            StorageMode::Persistent => Tracker::open(config).await,
        }
    }

    pub async fn ping(&self) -> crate::error::Result<()> {
        self.graph.ping().await?;
        self.vector.ping().await
    }

    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            StorageMode::Persistent => "persistent",
            StorageMode::Memory => "memory",
        }
    }
}
