//! Core data models.
//!
//! Documents and chunks flow through ingestion into the graph and vector
//! stores; test suites are produced per request and never stored.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Namespace for document ids (UUIDv5 of the relative path).
const DOCUMENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d0e_8a4b_4c1e_9f0a_1b2c_3d4e_5f60);

/// Change classification of a source document relative to the last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    New,
    Modified,
    Unchanged,
    Deleted,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::New => "new",
            DocumentStatus::Modified => "modified",
            DocumentStatus::Unchanged => "unchanged",
            DocumentStatus::Deleted => "deleted",
        }
    }

    /// Whether documents with this status must be (re)written to the stores.
    pub fn needs_ingest(&self) -> bool {
        matches!(self, DocumentStatus::New | DocumentStatus::Modified)
    }
}

/// Coarse document category inferred from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocType {
    Prd,
    Hld,
    Lld,
    ApiSpec,
    Architecture,
    Other,
}

impl DocType {
    pub fn from_file_name(name: &str) -> Self {
        let lowered = name.to_lowercase();
        if lowered.contains("prd") {
            DocType::Prd
        } else if lowered.contains("hld") {
            DocType::Hld
        } else if lowered.contains("lld") {
            DocType::Lld
        } else if lowered.contains("api") {
            DocType::ApiSpec
        } else if lowered.contains("architecture") {
            DocType::Architecture
        } else {
            DocType::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Prd => "PRD",
            DocType::Hld => "HLD",
            DocType::Lld => "LLD",
            DocType::ApiSpec => "API_SPEC",
            DocType::Architecture => "ARCHITECTURE",
            DocType::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PRD" => DocType::Prd,
            "HLD" => DocType::Hld,
            "LLD" => DocType::Lld,
            "API_SPEC" => DocType::ApiSpec,
            "ARCHITECTURE" => DocType::Architecture,
            _ => DocType::Other,
        }
    }
}

/// A source document as seen by the change tracker.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    /// Path relative to the documents root, `/`-separated.
    pub path: String,
    pub doc_type: DocType,
    /// SHA-256 of the file bytes, hex.
    pub content_hash: String,
    pub size: u64,
    pub modified_at: i64,
}

impl Document {
    /// Stable id for a relative path.
    pub fn id_for_path(path: &str) -> String {
        Uuid::new_v5(&DOCUMENT_NAMESPACE, path.as_bytes()).to_string()
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A heading-delimited run of text extracted from a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: Option<String>,
    pub text: String,
}

/// A bounded passage of a document: the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub document_path: String,
    pub doc_type: DocType,
    pub chunk_index: i64,
    pub section_title: Option<String>,
    pub text: String,
    pub hash: String,
}

/// How a chunk entered a retrieval context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitOrigin {
    /// Vector similarity hit.
    Vector,
    /// Term-match hit from the degraded path.
    Keyword,
    /// Pulled in through graph relationships.
    Graph,
}

/// A chunk with its retrieval score (absent for graph-expanded chunks).
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: Option<f32>,
    pub origin: HitOrigin,
}

// ============ Test cases ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    #[serde(alias = "Functional")]
    Functional,
    #[serde(alias = "Integration")]
    Integration,
    #[serde(alias = "API", alias = "Api")]
    Api,
    #[serde(alias = "UI", alias = "Ui")]
    Ui,
    #[serde(alias = "Performance")]
    Performance,
    #[serde(alias = "Security")]
    Security,
    #[serde(alias = "Generic")]
    Generic,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Functional => "functional",
            TestType::Integration => "integration",
            TestType::Api => "api",
            TestType::Ui => "ui",
            TestType::Performance => "performance",
            TestType::Security => "security",
            TestType::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[serde(alias = "High")]
    High,
    #[serde(alias = "Medium")]
    Medium,
    #[serde(alias = "Low")]
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStep {
    pub action: String,
    /// Input data; the model may return a string or a JSON object.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    pub expected_result: String,
}

impl TestStep {
    /// Data rendered as text: strings verbatim, anything else as JSON.
    pub fn data_text(&self) -> Option<String> {
        match &self.data {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub title: String,
    pub summary: String,
    pub test_type: TestType,
    pub priority: Priority,
    #[serde(default)]
    pub preconditions: Option<String>,
    /// Unstructured definition, used by generic tests.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<TestStep>,
    #[serde(default)]
    pub expected_result: Option<String>,
    #[serde(default)]
    pub test_script: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub components: Vec<String>,
}

/// The generation result returned by `POST /generate-tests`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    #[serde(default)]
    pub query: String,
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub total_count: usize,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
