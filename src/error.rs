//! Domain error type.
//!
//! Leaf components (stores, remote APIs, extraction) return [`Error`] so the
//! HTTP layer can map each kind to a status code. Command glue in `main.rs`
//! and the ingest summary use `anyhow` on top of it.

use thiserror::Error;

/// Result alias used by the store adapters, the embedding client and the agent.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A single document could not be ingested. Never aborts the batch.
    #[error("ingestion failed for {path}: {reason}")]
    Ingestion { path: String, reason: String },

    /// An embedding or generation API call failed.
    #[error("{service} request failed: {message}")]
    RemoteService { service: String, message: String },

    /// Vector retrieval was unavailable and no fallback path succeeded.
    #[error("retrieval degraded: {0}")]
    RetrievalDegraded(String),

    /// The generation model returned output that is not a valid test suite.
    #[error("could not parse generated test cases: {0}")]
    GenerationParse(String),

    #[error("{0}")]
    Validation(String),

    /// A graph or vector store operation failed.
    #[error("{store} error: {message}")]
    Store { store: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    pub fn remote(service: impl Into<String>, message: impl Into<String>) -> Self {
        Error::RemoteService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn store(store: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Store {
            store: store.into(),
            message: message.into(),
        }
    }

    pub fn ingestion(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Ingestion {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingestion_error_names_the_document() {
        let e = Error::ingestion("specs/login.docx", "word/document.xml not found");
        let msg = e.to_string();
        assert!(msg.contains("specs/login.docx"));
        assert!(msg.contains("word/document.xml not found"));
    }

    #[test]
    fn remote_error_names_the_service() {
        let e = Error::remote("gemini generation", "HTTP 500");
        assert_eq!(e.to_string(), "gemini generation request failed: HTTP 500");
    }

    #[test]
    fn store_error_names_the_store() {
        let e = Error::store("qdrant", "connection refused");
        assert!(e.to_string().starts_with("qdrant error"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: Error = io_err.into();
        assert!(e.to_string().contains("io error"));
    }
}
