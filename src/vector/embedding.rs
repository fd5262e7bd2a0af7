use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::SearchError;
use crate::util::{json_type_name, truncated_preview};
use crate::TARGET_EMBEDDING;

/// Produces the raw output of an embedding model for a piece of text.
///
/// The payload is returned untyped; `extract_embedding` validates its shape.
pub trait Embedder: Send + Sync {
    fn embed_raw(&self, text: &str) -> impl Future<Output = Result<Value>> + Send;
}

/// Client for the HuggingFace Inference feature-extraction pipeline.
#[derive(Clone, Debug)]
pub struct HuggingFaceEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HuggingFaceEmbedder {
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HuggingFace HTTP client")?;

        Ok(Self {
            client,
            endpoint: feature_extraction_url(base_url, model),
            api_key: api_key.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn feature_extraction_url(base_url: &str, model: &str) -> String {
    format!(
        "{}/models/{}/pipeline/feature-extraction",
        base_url.trim_end_matches('/'),
        model
    )
}

impl Embedder for HuggingFaceEmbedder {
    async fn embed_raw(&self, text: &str) -> Result<Value> {
        let start = Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "inputs": [text] }))
            .send()
            .await
            .with_context(|| format!("Request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(target: TARGET_EMBEDDING, "Embedding request returned {}: {}", status, body);
            anyhow::bail!("Embedding endpoint returned {}: {}", status, body);
        }

        let payload = response
            .json::<Value>()
            .await
            .context("Embedding endpoint returned invalid JSON")?;

        info!(target: TARGET_EMBEDDING,
            "Embedding request completed in {:?} for {} chars of input",
            start.elapsed(), text.len());

        Ok(payload)
    }
}

fn numeric_vector(values: &[Value], raw: &Value) -> Result<Vec<f32>, SearchError> {
    values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| SearchError::InvalidShape {
            reason: "Invalid embedding format".to_string(),
            preview: truncated_preview(raw),
        })
}

/// Turns the raw embedding payload into a flat vector.
///
/// Accepts a flat array of numbers or a batch of one (`[[...]]`). Anything else
/// is an `InvalidShape` error carrying a truncated preview of the payload.
pub fn extract_embedding(raw: &Value) -> Result<Vec<f32>, SearchError> {
    let items = match raw {
        Value::Array(items) => items,
        other => {
            return Err(SearchError::InvalidShape {
                reason: format!("Expected array, got {}", json_type_name(other)),
                preview: truncated_preview(raw),
            })
        }
    };

    match items.first() {
        Some(Value::Array(inner)) => numeric_vector(inner, raw),
        Some(Value::Number(_)) => numeric_vector(items, raw),
        _ => Err(SearchError::InvalidShape {
            reason: "Invalid embedding format".to_string(),
            preview: truncated_preview(raw),
        }),
    }
}

/// Logs a warning when an embedding does not have the expected dimensionality.
///
/// This never fails: the vector index is the component that rejects wrong sizes.
pub fn check_dimension(embedding: &[f32], expected: usize) -> bool {
    if embedding.len() != expected {
        warn!(target: TARGET_EMBEDDING,
            "Expected {} dimensions, got {}", expected, embedding.len());
        return false;
    }

    let magnitude: f32 = embedding.iter().map(|x| x.powi(2)).sum::<f32>().sqrt();
    let max = embedding.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let min = embedding.iter().fold(f32::INFINITY, |a, &b| a.min(b));
    info!(target: TARGET_EMBEDDING,
        "Embedding statistics: Dimensions: {}; Min: {:.4}; Max: {:.4}; Vector magnitude: {:.6}",
        embedding.len(), min, max, magnitude);

    true
}
