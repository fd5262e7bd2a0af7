use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::articles::{ArticleBackend, ArticleStore};
use crate::config::{ArticleBackendKind, Config, VectorBackendKind};
use crate::db::Database;
use crate::error::SearchError;
use crate::supabase::SupabaseClient;
use crate::vector::{
    check_dimension, dedupe, extract_embedding, DedupedResult, Embedder, EmbeddingKind,
    HuggingFaceEmbedder, QdrantIndex, ResultEnvelope, VectorBackend, VectorIndex, TARGET_VECTOR,
};

pub const MIN_MATCH_COUNT: u64 = 1;
pub const MAX_MATCH_COUNT: u64 = 100;

/// Request body accepted by the search and embedding endpoints.
///
/// Fields are kept untyped so that a value of the wrong type is reported with
/// the same message as an out-of-range one.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: Option<Value>,
    #[serde(rename = "type")]
    pub kind: Option<Value>,
    pub match_threshold: Option<Value>,
    pub match_count: Option<Value>,
}

/// A validated search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub kind: EmbeddingKind,
    pub match_threshold: Option<f64>,
    pub match_count: Option<u64>,
}

impl SearchRequest {
    pub fn validate(self) -> Result<SearchQuery, SearchError> {
        let text = match self.query {
            Some(Value::String(text)) if !text.trim().is_empty() => text,
            _ => return Err(SearchError::validation("Query text is required")),
        };

        // A non-string type fails the same parse as an unknown one.
        let kind = match &self.kind {
            None => EmbeddingKind::default(),
            Some(kind) => kind
                .as_str()
                .unwrap_or_default()
                .parse::<EmbeddingKind>()
                .map_err(SearchError::Validation)?,
        };

        let match_threshold = match self.match_threshold.as_ref().map(Value::as_f64) {
            None => None,
            Some(Some(threshold)) if (0.0..=1.0).contains(&threshold) => Some(threshold),
            Some(_) => {
                return Err(SearchError::validation(
                    "matchThreshold must be a number between 0 and 1",
                ))
            }
        };

        // Fractional counts are accepted and rounded down.
        let count_range = MIN_MATCH_COUNT as f64..=MAX_MATCH_COUNT as f64;
        let match_count = match self.match_count.as_ref().map(Value::as_f64) {
            None => None,
            Some(Some(count)) if count_range.contains(&count) => Some(count as u64),
            Some(_) => {
                return Err(SearchError::validation(format!(
                    "matchCount must be a number between {} and {}",
                    MIN_MATCH_COUNT, MAX_MATCH_COUNT
                )))
            }
        };

        Ok(SearchQuery {
            text,
            kind,
            match_threshold,
            match_count,
        })
    }
}

/// Defaults applied when a request does not override them.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub match_threshold: f64,
    pub match_count: u64,
    pub expected_dimension: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            match_threshold: 0.7,
            match_count: 10,
            expected_dimension: 768,
        }
    }
}

/// Attaches each result's article, looked up with one batch fetch.
///
/// Results whose canonical key has no article keep `article: None`. A failed
/// fetch fails the whole join.
pub async fn join_articles<A: ArticleStore>(
    store: &A,
    mut results: Vec<DedupedResult>,
) -> Result<Vec<DedupedResult>, SearchError> {
    let ids: Vec<String> = results
        .iter()
        .filter_map(|r| r.base_key.as_deref())
        .filter(|id| !id.is_empty())
        .collect::<BTreeSet<&str>>()
        .into_iter()
        .map(str::to_string)
        .collect();

    if ids.is_empty() {
        return Ok(results);
    }

    let mut articles = store.fetch_articles(&ids).await.map_err(SearchError::join)?;

    let mut missing = 0;
    for result in results.iter_mut() {
        result.article = result
            .base_key
            .as_deref()
            .and_then(|id| articles.remove(id));
        if result.article.is_none() {
            missing += 1;
        }
    }

    if missing > 0 {
        info!(target: TARGET_VECTOR, "{} of {} results have no matching article", missing, results.len());
    }

    Ok(results)
}

/// Builds the response envelope, keeping the ranked order.
pub fn assemble(results: Vec<DedupedResult>) -> ResultEnvelope {
    let order: Vec<String> = results.iter().map(|r| r.key.clone()).collect();
    let results_by_key: BTreeMap<String, DedupedResult> = results
        .into_iter()
        .map(|r| (r.key.clone(), r))
        .collect();

    ResultEnvelope {
        count: order.len(),
        order,
        results_by_key,
    }
}

/// The search pipeline: embed, retrieve, deduplicate, join, assemble.
///
/// Each stage awaits the previous one; no state is shared between requests.
pub struct SearchPipeline<E, V, A> {
    embedder: E,
    index: V,
    articles: A,
    settings: SearchSettings,
}

impl<E, V, A> SearchPipeline<E, V, A>
where
    E: Embedder,
    V: VectorIndex,
    A: ArticleStore,
{
    pub fn new(embedder: E, index: V, articles: A, settings: SearchSettings) -> Self {
        Self {
            embedder,
            index,
            articles,
            settings,
        }
    }

    /// Embeds `text` as given and validates the result.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let raw = self
            .embedder
            .embed_raw(text)
            .await
            .map_err(SearchError::embedding)?;

        let embedding = extract_embedding(&raw)?;
        check_dimension(&embedding, self.settings.expected_dimension);
        Ok(embedding)
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<ResultEnvelope, SearchError> {
        let start = Instant::now();
        let threshold = query
            .match_threshold
            .unwrap_or(self.settings.match_threshold);
        let limit = query.match_count.unwrap_or(self.settings.match_count);

        let embedding = self.embed(&query.text).await?;
        let embedded = Instant::now();

        let candidates = self
            .index
            .match_embeddings(&embedding, threshold, limit)
            .await
            .map_err(SearchError::retrieval)?;
        let retrieved = Instant::now();
        let candidate_count = candidates.len();
        if candidate_count as u64 > limit {
            warn!(target: TARGET_VECTOR,
                "Vector index returned {} rows for a limit of {}", candidate_count, limit);
        }

        let ranked = dedupe(candidates);
        let joined = join_articles(&self.articles, ranked).await?;
        let envelope = assemble(joined);

        info!(target: TARGET_VECTOR,
            "Search complete: {} candidates, {} unique results; Timing: Embedding: {:?}; Retrieval: {:?}; Join: {:?}; Total: {:?}",
            candidate_count,
            envelope.count,
            embedded.duration_since(start),
            retrieved.duration_since(embedded),
            retrieved.elapsed(),
            start.elapsed()
        );

        Ok(envelope)
    }
}

/// The pipeline wired to the backends selected in the configuration.
pub type ServicePipeline = SearchPipeline<HuggingFaceEmbedder, VectorBackend, ArticleBackend>;

fn supabase_client(config: &Config) -> Result<SupabaseClient> {
    let supabase = config
        .supabase
        .as_ref()
        .context("Supabase backend selected but SB_CLOUD_URL is not configured")?;
    SupabaseClient::new(&supabase.url, &supabase.service_key, config.request_timeout)
}

impl ServicePipeline {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = HuggingFaceEmbedder::new(
            &config.hf_inference_url,
            &config.embedding_model,
            &config.hf_api_key,
            config.request_timeout,
        )?;
        info!(target: TARGET_VECTOR, "Embedding endpoint: {}", embedder.endpoint());

        let index = match config.vector_backend {
            VectorBackendKind::Supabase => VectorBackend::Supabase(supabase_client(config)?),
            VectorBackendKind::Qdrant => {
                let url = config
                    .qdrant_url
                    .as_deref()
                    .context("Qdrant backend selected but QDRANT_URL is not configured")?;
                VectorBackend::Qdrant(QdrantIndex::new(
                    url,
                    &config.qdrant_collection,
                    config.request_timeout,
                )?)
            }
        };

        let articles = match config.article_backend {
            ArticleBackendKind::Supabase => ArticleBackend::Supabase(supabase_client(config)?),
            ArticleBackendKind::Sqlite => ArticleBackend::Sqlite(
                Database::new(&config.database_path)
                    .await
                    .with_context(|| format!("Failed to open {}", config.database_path))?,
            ),
        };

        info!(target: TARGET_VECTOR,
            "Search pipeline ready: vector backend = {:?}, article backend = {:?}",
            config.vector_backend, config.article_backend);

        Ok(Self::new(embedder, index, articles, config.search_settings()))
    }
}
