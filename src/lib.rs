//! # GraphRAG Test Generator
//!
//! Turns a folder of product documents (PRDs, API specs, design notes) into
//! structured test cases. Documents are chunked, embedded, and stored twice:
//! as nodes in a graph (document, section and chunk relationships) and as
//! points in a vector index. A query retrieves the most similar chunks,
//! widens them with their graph neighbours, and hands the context to an
//! LLM that answers with a JSON test suite.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ .docx/.md  │──▶│ Extract+Chunk│──▶│ Graph (Neo4j)│
//! │  folder    │   │   + Embed    │──▶│ Vec (Qdrant) │
//! └────────────┘   └──────────────┘   └──────┬───────┘
//!        ▲ hashes in SQLite tracker          │ hybrid retrieval
//!                                            ▼
//!                        ┌──────────┐   ┌──────────┐
//!                        │   CLI    │   │   HTTP   │──▶ LLM ──▶ TestSuite
//!                        │(testgen) │   │  + UI    │
//!                        └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! testgen init                       # create tracker db and graph schema
//! testgen ingest                     # ingest new and changed documents
//! testgen generate "Login API should handle invalid credentials"
//! testgen serve                      # HTTP API and UI
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Domain error type |
//! | [`models`] | Documents, chunks and test cases |
//! | [`tracker`] | Change detection over the document folder |
//! | [`extract`] | `.docx` and Markdown text extraction |
//! | [`chunk`] | Section-aware sliding-window chunking |
//! | [`embedding`] | Embedding providers |
//! | [`graph`] | Graph store trait, Neo4j and in-memory adapters |
//! | [`vector`] | Vector store trait, Qdrant and in-memory adapters |
//! | [`storage`] | Store selection |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieve`] | Hybrid retrieval |
//! | [`agent`] | Prompting and test-suite parsing |
//! | [`export`] | Xray import JSON |
//! | [`server`] | HTTP API and UI |
//! | [`verify`] | Dependency health checks |
//! | [`db`] | Tracker database connection |
//! | [`migrate`] | Tracker schema |

pub mod agent;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod export;
pub mod extract;
pub mod graph;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod remote;
pub mod retrieve;
pub mod server;
pub mod storage;
pub mod tracker;
pub mod vector;
pub mod verify;
