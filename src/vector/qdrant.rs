//! Qdrant [`VectorStore`] over the REST API.
//!
//! Self-hosted instances are called without credentials; managed (Qdrant
//! Cloud) connections send `QDRANT_API_KEY` in the `api-key` header.
//! Writes use `?wait=true` so a successful ingest is immediately searchable.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use super::{PointPayload, VectorHit, VectorPoint, VectorStore};
use crate::config::{VectorConnection, VectorKind};
use crate::error::{Error, Result};
use crate::remote;

const STORE: &str = "qdrant";

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

impl QdrantStore {
    /// Connect with `QDRANT_API_KEY` from the environment in managed mode.
    pub fn new(conn: &VectorConnection) -> Result<Self> {
        let api_key = match conn.kind {
            VectorKind::Managed => Some(remote::api_key("QDRANT_API_KEY").map_err(|_| {
                Error::Config(
                    "QDRANT_API_KEY environment variable not set (required for managed vector store)"
                        .to_string(),
                )
            })?),
            VectorKind::SelfHosted => None,
        };
        Self::connect(conn, api_key)
    }

    /// Connect with an explicit key; `None` sends no `api-key` header.
    pub fn connect(conn: &VectorConnection, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: remote::client(conn.timeout_secs)?,
            base_url: conn.url.trim_end_matches('/').to_string(),
            collection: conn.collection.clone(),
            api_key,
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    async fn send(&self, method: Method, url: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut req = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req
            .send()
            .await
            .map_err(|e| Error::store(STORE, e.to_string()))?;
        let status = response.status();
        let json = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, json))
    }

    /// Send and return the `result` field of a successful response.
    async fn call(&self, method: Method, url: &str, body: Option<Value>) -> Result<Value> {
        let (status, json) = self.send(method, url, body).await?;
        if !status.is_success() {
            let detail = json
                .pointer("/status/error")
                .and_then(|e| e.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| json.to_string());
            return Err(Error::store(STORE, format!("HTTP {}: {}", status, detail)));
        }
        Ok(json.get("result").cloned().unwrap_or(Value::Null))
    }
}

fn parse_hits(result: &Value) -> Result<Vec<VectorHit>> {
    let items = result
        .as_array()
        .ok_or_else(|| Error::store(STORE, "search result is not an array"))?;
    items
        .iter()
        .map(|item| {
            let id = match item.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return Err(Error::store(STORE, "search hit missing id")),
            };
            let score = item
                .get("score")
                .and_then(|s| s.as_f64())
                .ok_or_else(|| Error::store(STORE, "search hit missing score"))? as f32;
            let payload = item
                .get("payload")
                .cloned()
                .and_then(|p| serde_json::from_value::<PointPayload>(p).ok());
            Ok(VectorHit { id, score, payload })
        })
        .collect()
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn name(&self) -> &'static str {
        STORE
    }

    async fn ping(&self) -> Result<()> {
        let url = format!("{}/collections", self.base_url);
        self.call(Method::GET, &url, None).await.map(|_| ())
    }

    async fn ensure_collection(&self, dims: usize) -> Result<()> {
        let url = self.collection_url("");
        let (status, json) = self.send(Method::GET, &url, None).await?;

        if status == StatusCode::NOT_FOUND {
            tracing::info!(collection = %self.collection, dims, "creating qdrant collection");
            self.call(
                Method::PUT,
                &url,
                Some(json!({ "vectors": { "size": dims, "distance": "Cosine" } })),
            )
            .await?;
            return Ok(());
        }
        if !status.is_success() {
            return Err(Error::store(STORE, format!("HTTP {}: {}", status, json)));
        }

        let existing = json
            .pointer("/result/config/params/vectors/size")
            .and_then(|s| s.as_u64());
        match existing {
            Some(size) if size as usize != dims => Err(Error::store(
                STORE,
                format!(
                    "collection '{}' has {} dims, embedding model produces {}",
                    self.collection, size, dims
                ),
            )),
            _ => Ok(()),
        }
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body: Vec<Value> = points
            .iter()
            .map(|p| json!({ "id": p.id, "vector": p.vector, "payload": p.payload }))
            .collect();
        self.call(
            Method::PUT,
            &self.collection_url("/points?wait=true"),
            Some(json!({ "points": body })),
        )
        .await
        .map(|_| ())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.call(
            Method::POST,
            &self.collection_url("/points/delete?wait=true"),
            Some(json!({
                "filter": { "must": [{ "key": "document_id", "match": { "value": document_id } }] }
            })),
        )
        .await
        .map(|_| ())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<VectorHit>> {
        let mut body = json!({
            "vector": query,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(t) = score_threshold {
            body["score_threshold"] = json!(t);
        }
        let result = self
            .call(Method::POST, &self.collection_url("/points/search"), Some(body))
            .await?;
        parse_hits(&result)
    }

    async fn count(&self) -> Result<u64> {
        let result = self
            .call(
                Method::POST,
                &self.collection_url("/points/count"),
                Some(json!({ "exact": true })),
            )
            .await?;
        Ok(result.get("count").and_then(|c| c.as_u64()).unwrap_or(0))
    }
}
