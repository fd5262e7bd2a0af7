use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::articles::{index_by_news_id, ArticleRecord, ArticleStore};
use crate::vector::{CandidateMatch, VectorIndex, TARGET_VECTOR};
use crate::{TARGET_DB, TARGET_WEB_REQUEST};

/// Stored procedure performing the pgvector similarity search.
pub const MATCH_RPC: &str = "match_content_embeddings";
/// Table holding published articles.
pub const ARTICLES_TABLE: &str = "news_articles";

/// Minimal PostgREST client for the hosted Supabase project.
#[derive(Clone, Debug)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .context("Failed to build Supabase HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    /// Calls the similarity search stored procedure.
    pub async fn match_embeddings(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: u64,
    ) -> Result<Vec<CandidateMatch>> {
        info!(target: TARGET_VECTOR,
            "Calling {} RPC: embedding length = {}, threshold = {}, limit = {}",
            MATCH_RPC, embedding.len(), threshold, limit);
        let start = Instant::now();

        let body = json!({
            "query_embedding": embedding,
            "match_threshold": threshold,
            "match_count": limit,
        });
        let response = self
            .authorized(self.client.post(self.rest_url(&format!("rpc/{}", MATCH_RPC))))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} RPC request failed", MATCH_RPC))?;

        let response = check_status(response, MATCH_RPC).await?;
        let matches = response
            .json::<Vec<CandidateMatch>>()
            .await
            .with_context(|| format!("{} RPC returned unexpected rows", MATCH_RPC))?;

        info!(target: TARGET_VECTOR,
            "Found {} candidate embeddings in {:?}", matches.len(), start.elapsed());
        Ok(matches)
    }

    /// Loads all articles whose `news_id` is in `ids` with a single request.
    pub async fn fetch_articles(&self, ids: &[String]) -> Result<HashMap<String, ArticleRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        debug!(target: TARGET_DB, "Fetching {} articles from {}", ids.len(), ARTICLES_TABLE);
        let start = Instant::now();

        let filter = in_filter(ids);
        let response = self
            .authorized(self.client.get(self.rest_url(ARTICLES_TABLE)))
            .query(&[("select", "*"), ("news_id", filter.as_str())])
            .send()
            .await
            .with_context(|| format!("Request to {} failed", ARTICLES_TABLE))?;

        let response = check_status(response, ARTICLES_TABLE).await?;
        let articles = response
            .json::<Vec<ArticleRecord>>()
            .await
            .with_context(|| format!("{} returned unexpected rows", ARTICLES_TABLE))?;

        info!(target: TARGET_DB,
            "Fetched {} of {} requested articles in {:?}",
            articles.len(), ids.len(), start.elapsed());
        Ok(index_by_news_id(articles))
    }
}

/// Builds a PostgREST `in.(...)` filter, quoting every value.
fn in_filter(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

/// Turns a non-2xx PostgREST response into an error carrying its message.
async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body);
    error!(target: TARGET_WEB_REQUEST, "Supabase {} returned {}: {}", what, status, message);
    Err(anyhow::anyhow!("{} returned {}: {}", what, status, message))
}

impl VectorIndex for SupabaseClient {
    async fn match_embeddings(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: u64,
    ) -> Result<Vec<CandidateMatch>> {
        SupabaseClient::match_embeddings(self, embedding, threshold, limit).await
    }
}

impl ArticleStore for SupabaseClient {
    async fn fetch_articles(&self, ids: &[String]) -> Result<HashMap<String, ArticleRecord>> {
        SupabaseClient::fetch_articles(self, ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_filter_quotes_values() {
        let ids = vec![
            "2025-10-12345".to_string(),
            "a,b".to_string(),
            "say \"hi\"".to_string(),
        ];
        assert_eq!(
            in_filter(&ids),
            r#"in.("2025-10-12345","a,b","say \"hi\"")"#
        );
    }

    #[test]
    fn test_rest_url() {
        let client =
            SupabaseClient::new("https://abc.supabase.co/", "key", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.rest_url("rpc/match_content_embeddings"),
            "https://abc.supabase.co/rest/v1/rpc/match_content_embeddings"
        );
    }
}
