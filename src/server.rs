//! HTTP API and single-page UI.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Browser UI |
//! | `POST` | `/generate-tests` | Retrieve context and generate a test suite; `degraded` marks keyword-only retrieval |
//! | `GET`  | `/health` | Version, storage mode and store counts |
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "detail": "query must not be empty", "code": "validation_error" }
//! ```
//!
//! | Error | Status | Code |
//! |-------|--------|------|
//! | Validation | 400 | `validation_error` |
//! | Generation parse | 502 | `generation_parse_error` |
//! | Remote service | 502 | `remote_service_error` |
//! | Store / retrieval | 503 | `store_unavailable` |
//! | Anything else | 500 | `internal_error` |
//!
//! # CORS
//!
//! Origins come from `[server].cors_origins`; an empty list allows any origin.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::agent::{self, create_generator, Generator};
use crate::config::{Config, StorageMode};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::Error;
use crate::graph::GraphStats;
use crate::ingest::{run_ingest, IngestOptions};
use crate::models::TestSuite;
use crate::retrieve::Retriever;
use crate::storage::Storage;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Storage,
    pub retriever: Arc<Retriever>,
    pub generator: Arc<dyn Generator>,
}

impl AppState {
    pub fn new(
        config: Config,
        storage: Storage,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let retriever = Retriever::new(storage.clone(), embedder, config.retrieval.clone());
        Self {
            config: Arc::new(config),
            storage,
            retriever: Arc::new(retriever),
            generator,
        }
    }
}

/// Starts the server from configuration.
///
/// Opens the stores and providers, and in memory mode ingests the document
/// root first so the stores are populated before the first request.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let storage = Storage::open(config).await?;
    let embedder = create_provider(&config.embedding)?;
    let generator = create_generator(&config.generation)?;

    if storage.mode == StorageMode::Memory {
        let tracker = storage.open_tracker(config).await?;
        let report = run_ingest(
            config,
            &tracker,
            &storage,
            embedder.as_ref(),
            IngestOptions::default(),
        )
        .await?;
        report.print();
    }

    run_server_with_state(AppState::new(config.clone(), storage, embedder, generator)).await
}

/// Starts the server with prebuilt state (custom providers or stores).
pub async fn run_server_with_state(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("testgen server listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    Router::new()
        .route("/", get(handle_index))
        .route("/generate-tests", post(handle_generate))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(values))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
    code: &'static str,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    detail: String,
}

impl AppError {
    fn validation(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "validation_error",
            detail: detail.into(),
        }
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Error::GenerationParse(_) => (StatusCode::BAD_GATEWAY, "generation_parse_error"),
            Error::RemoteService { .. } => (StatusCode::BAD_GATEWAY, "remote_service_error"),
            Error::Store { .. } | Error::RetrievalDegraded(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        Self {
            status,
            code,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, detail = %self.detail, "request failed");
        }
        let body = ErrorBody {
            detail: self.detail,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ GET / ============

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

// ============ POST /generate-tests ============

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub query: String,
    /// Overrides `retrieval.top_k` for this request.
    #[serde(default)]
    pub k: Option<usize>,
}

/// The generated suite plus how its context was retrieved.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    #[serde(flatten)]
    pub suite: TestSuite,
    /// True when the vector path was unavailable and keyword search was used.
    pub degraded: bool,
}

async fn handle_generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, AppError> {
    let Json(req) = body.map_err(|e| AppError::validation(e.body_text()))?;

    let query = req.query.trim();
    if query.is_empty() {
        return Err(AppError::validation("query must not be empty"));
    }
    if req.k == Some(0) {
        return Err(AppError::validation("k must be >= 1"));
    }

    let k = req.k.unwrap_or_else(|| state.retriever.default_k());
    let context = state.retriever.retrieve(query, k).await?;
    let suite = agent::generate(state.generator.as_ref(), query, &context).await?;
    Ok(Json(GenerateResponse {
        suite,
        degraded: context.degraded,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// `"ok"`, or `"degraded"` when a store did not answer.
    status: &'static str,
    version: &'static str,
    storage_mode: &'static str,
    graph: Option<GraphStats>,
    vectors: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut errors = Vec::new();
    let graph = match state.storage.graph.stats().await {
        Ok(s) => Some(s),
        Err(e) => {
            errors.push(e.to_string());
            None
        }
    };
    let vectors = match state.storage.vector.count().await {
        Ok(c) => Some(c),
        Err(e) => {
            errors.push(e.to_string());
            None
        }
    };
    Json(HealthResponse {
        status: if errors.is_empty() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        storage_mode: state.storage.mode_name(),
        graph,
        vectors,
        errors,
    })
}
