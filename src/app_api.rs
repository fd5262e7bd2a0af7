use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::{header, HeaderValue},
    middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::Instant;
use tracing::{error, info};

use crate::articles::ArticleStore;
use crate::config::Config;
use crate::error::SearchError;
use crate::pipeline::{SearchPipeline, SearchRequest, ServicePipeline};
use crate::vector::{Embedder, EmbeddingKind, ResultEnvelope, VectorIndex};
use crate::TARGET_WEB_REQUEST;

const ALLOWED_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

/// Shared, read-only state handed to every request.
pub struct AppState<E, V, A> {
    pipeline: Arc<SearchPipeline<E, V, A>>,
}

// Derived Clone would require the collaborators themselves to be Clone.
impl<E, V, A> Clone for AppState<E, V, A> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
    pub dimension: usize,
    #[serde(rename = "type")]
    pub kind: EmbeddingKind,
}

/// Builds the HTTP API around a search pipeline.
pub fn router<E, V, A>(pipeline: Arc<SearchPipeline<E, V, A>>) -> Router
where
    E: Embedder + 'static,
    V: VectorIndex + 'static,
    A: ArticleStore + 'static,
{
    Router::new()
        .route(
            "/get-embeddings",
            post(search_similar::<E, V, A>).options(preflight),
        )
        .route(
            "/embeddings",
            post(generate_embedding::<E, V, A>).options(preflight),
        )
        .route("/health", get(health).options(preflight))
        .layer(middleware::map_response(with_cors_headers))
        .with_state(AppState { pipeline })
}

pub async fn app_api_loop(config: Config) -> Result<()> {
    let pipeline = ServicePipeline::from_config(&config)
        .await
        .context("Failed to build search pipeline")?;
    let app = router(Arc::new(pipeline));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(target: TARGET_WEB_REQUEST, "Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server terminated unexpectedly")?;

    info!(target: TARGET_WEB_REQUEST, "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_err() {
        error!(target: TARGET_WEB_REQUEST, "Failed to listen for ctrl-c");
    }
}

/// Malformed bodies are the caller's fault, not an unprocessable entity.
fn rejected(rejection: JsonRejection) -> SearchError {
    SearchError::validation(rejection.body_text())
}

async fn search_similar<E, V, A>(
    State(state): State<AppState<E, V, A>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<ResultEnvelope>, SearchError>
where
    E: Embedder,
    V: VectorIndex,
    A: ArticleStore,
{
    let Json(request) = payload.map_err(rejected)?;
    let query = request.validate()?;

    info!(target: TARGET_WEB_REQUEST,
        "Search request: type = {}, query length = {}, threshold = {:?}, count = {:?}",
        query.kind, query.text.chars().count(), query.match_threshold, query.match_count);
    let start = Instant::now();

    let envelope = state.pipeline.search(&query).await?;

    info!(target: TARGET_WEB_REQUEST,
        "Returning {} results in {:?}", envelope.count, start.elapsed());
    Ok(Json(envelope))
}

async fn generate_embedding<E, V, A>(
    State(state): State<AppState<E, V, A>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<EmbeddingResponse>, SearchError>
where
    E: Embedder,
    V: VectorIndex,
    A: ArticleStore,
{
    let Json(request) = payload.map_err(rejected)?;
    let query = request.validate()?;

    info!(target: TARGET_WEB_REQUEST,
        "Embedding request: type = {}, text length = {}", query.kind, query.text.chars().count());

    let embedding = state.pipeline.embed(&query.text).await?;
    Ok(Json(EmbeddingResponse {
        dimension: embedding.len(),
        embedding,
        kind: query.kind,
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn preflight() -> &'static str {
    "ok"
}

async fn with_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    response
}
