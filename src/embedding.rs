//! Text embeddings for chunks and queries.
//!
//! Every backend implements [`EmbeddingProvider`]:
//! - **[`DisabledProvider`]**: errors on use; the default until a provider is configured.
//! - **[`GeminiProvider`]**: Gemini `batchEmbedContents`.
//! - **[`OpenAIProvider`]**: OpenAI `/v1/embeddings`.
//! - **[`HashProvider`]**: local feature hashing with no network access.
//!
//! Remote providers send one request per batch and retry transient failures
//! only when `embedding.max_retries > 0` (see [`crate::remote`]). Every
//! returned vector is checked against the configured dimensionality.
//!
//! [`create_provider`] picks the backend from `[embedding].provider`:
//!
//! ```rust,no_run
//! # use graphrag_testgen::config::EmbeddingConfig;
//! # use graphrag_testgen::embedding::create_provider;
//! let provider = create_provider(&EmbeddingConfig::default()).unwrap();
//! assert_eq!(provider.dims(), 0);
//! ```

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::error::{Error, Result};
use crate::remote;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com";

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-004"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts in a single call. Output order matches input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (e.g. a retrieval query).
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::remote(self.model_name(), "empty embedding response"))
    }
}

/// Instantiate the provider selected by `embedding.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(match config.provider {
        EmbeddingProviderKind::Disabled => Arc::new(DisabledProvider),
        EmbeddingProviderKind::Hash => Arc::new(HashProvider::new(required_dims(config)?)),
        EmbeddingProviderKind::Gemini => Arc::new(GeminiProvider::new(config)?),
        EmbeddingProviderKind::OpenAI => Arc::new(OpenAIProvider::new(config)?),
    })
}

/// Embed any number of texts, `batch_size` per provider call.
pub async fn embed_all(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = provider.embed_batch(batch).await?;
        if vectors.len() != batch.len() {
            return Err(Error::remote(
                provider.model_name(),
                format!("expected {} embeddings, got {}", batch.len(), vectors.len()),
            ));
        }
        out.extend(vectors);
    }
    Ok(out)
}

fn required_dims(config: &EmbeddingConfig) -> Result<usize> {
    config
        .dims
        .filter(|d| *d > 0)
        .ok_or_else(|| Error::Config("embedding.dims required".to_string()))
}

fn required_model(config: &EmbeddingConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| Error::Config("embedding.model required".to_string()))
}

fn check_dims(service: &str, expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if let Some(v) = vectors.iter().find(|v| v.len() != expected) {
        return Err(Error::remote(
            service,
            format!("expected {}-dimensional embeddings, got {}", expected, v.len()),
        ));
    }
    Ok(())
}

fn parse_values(value: Option<&serde_json::Value>) -> Option<Vec<f32>> {
    value?.as_array().map(|arr| {
        arr.iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect()
    })
}

// ============ Disabled Provider ============

/// Used when `embedding.provider = "disabled"`; every call fails.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::Config("embedding provider is disabled".to_string()))
    }
}

// ============ Hash Provider ============

/// Bag-of-words feature hashing: each lowercase alphanumeric token adds
/// weight to a SHA-256-selected bucket, and the result is L2-normalised.
/// Texts sharing vocabulary score higher under cosine similarity.
pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dims;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

// ============ Gemini Provider ============

/// Calls `POST {base}/v1beta/models/{model}:batchEmbedContents` with the
/// `GEMINI_API_KEY` from the environment.
pub struct GeminiProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    api_key: String,
    base_url: String,
    max_retries: u32,
}

impl GeminiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: remote::client(config.timeout_secs)?,
            model: required_model(config)?,
            dims: required_dims(config)?,
            api_key: remote::api_key("GEMINI_API_KEY")?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model_path = format!("models/{}", self.model);
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|t| {
                serde_json::json!({
                    "model": model_path,
                    "content": { "parts": [{ "text": t }] },
                    "outputDimensionality": self.dims,
                })
            })
            .collect();
        let body = serde_json::json!({ "requests": requests });
        let url = format!(
            "{}/v1beta/{}:batchEmbedContents",
            self.base_url.trim_end_matches('/'),
            model_path
        );

        let json = remote::post_json("gemini embedding", self.max_retries, || {
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;

        let vectors = parse_gemini_response(&json)?;
        check_dims("gemini embedding", self.dims, &vectors)?;
        Ok(vectors)
    }
}

fn parse_gemini_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let items = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::remote("gemini embedding", "missing embeddings array"))?;

    items
        .iter()
        .map(|item| {
            parse_values(item.get("values"))
                .ok_or_else(|| Error::remote("gemini embedding", "missing embedding values"))
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Calls `POST {base}/v1/embeddings` with the `OPENAI_API_KEY` from the
/// environment.
pub struct OpenAIProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    api_key: String,
    base_url: String,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: remote::client(config.timeout_secs)?,
            model: required_model(config)?,
            dims: required_dims(config)?,
            api_key: remote::api_key("OPENAI_API_KEY")?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));

        let json = remote::post_json("openai embedding", self.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let vectors = parse_openai_response(&json)?;
        check_dims("openai embedding", self.dims, &vectors)?;
        Ok(vectors)
    }
}

/// Extracts `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::remote("openai embedding", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let vec = parse_values(item.get("embedding"))
            .ok_or_else(|| Error::remote("openai embedding", "missing embedding"))?;
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Vector utilities ============

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
