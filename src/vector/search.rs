use anyhow::{Context, Result};
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    ScoredPoint, SearchParams, SearchPoints, Value as QdrantValue, WithPayloadSelector,
    WithVectorsSelector,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

use crate::supabase::SupabaseClient;
use crate::util::parse_timestamp;
use crate::vector::{CandidateMatch, TARGET_VECTOR};

/// Nearest-neighbour search over stored embeddings.
///
/// Implementations return at most `limit` rows with similarity of at least
/// `threshold`, in no particular order.
pub trait VectorIndex: Send + Sync {
    fn match_embeddings(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: u64,
    ) -> impl Future<Output = Result<Vec<CandidateMatch>>> + Send;
}

/// The configured vector index.
pub enum VectorBackend {
    Supabase(SupabaseClient),
    Qdrant(QdrantIndex),
}

impl VectorIndex for VectorBackend {
    async fn match_embeddings(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: u64,
    ) -> Result<Vec<CandidateMatch>> {
        match self {
            Self::Supabase(client) => client.match_embeddings(embedding, threshold, limit).await,
            Self::Qdrant(index) => index.match_embeddings(embedding, threshold, limit).await,
        }
    }
}

/// Similarity search against a Qdrant collection whose payload carries the
/// storage `key`, `created_at` and `cluster_id` of each embedding.
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
}

impl QdrantIndex {
    pub fn new(url: &str, collection: &str, timeout: Duration) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .timeout(timeout)
            .build()
            .with_context(|| format!("Failed to build Qdrant client for {}", url))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
        })
    }
}

fn payload_string(payload: &HashMap<String, QdrantValue>, field: &str) -> Option<String> {
    payload
        .get(field)
        .and_then(|v| v.kind.as_ref())
        .and_then(|k| match k {
            Kind::StringValue(s) => Some(s.clone()),
            _ => None,
        })
}

fn payload_integer(payload: &HashMap<String, QdrantValue>, field: &str) -> Option<i64> {
    payload
        .get(field)
        .and_then(|v| v.kind.as_ref())
        .and_then(|k| match k {
            Kind::IntegerValue(i) => Some(*i),
            Kind::DoubleValue(d) if d.fract() == 0.0 => Some(*d as i64),
            _ => None,
        })
}

fn point_to_candidate(point: ScoredPoint) -> CandidateMatch {
    let id = match point.id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Num(num)) => num.to_string(),
        Some(PointIdOptions::Uuid(uuid)) => uuid,
        None => String::new(),
    };

    CandidateMatch {
        id,
        key: payload_string(&point.payload, "key"),
        similarity: f64::from(point.score),
        cluster_id: payload_integer(&point.payload, "cluster_id"),
        created_at: payload_string(&point.payload, "created_at")
            .as_deref()
            .and_then(parse_timestamp),
    }
}

impl VectorIndex for QdrantIndex {
    async fn match_embeddings(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: u64,
    ) -> Result<Vec<CandidateMatch>> {
        info!(target: TARGET_VECTOR,
            "Searching collection {}: embedding length = {}, threshold = {}, limit = {}",
            self.collection, embedding.len(), threshold, limit);
        let start = Instant::now();

        let search_points = SearchPoints {
            collection_name: self.collection.clone(),
            vector: embedding.to_vec(),
            limit,
            with_payload: Some(WithPayloadSelector::from(true)),
            with_vectors: Some(WithVectorsSelector::from(false)),
            params: Some(SearchParams {
                hnsw_ef: Some(128),
                ..Default::default()
            }),
            score_threshold: Some(threshold as f32),
            ..Default::default()
        };

        match self.client.search_points(search_points).await {
            Ok(response) => {
                let matches: Vec<CandidateMatch> =
                    response.result.into_iter().map(point_to_candidate).collect();
                info!(target: TARGET_VECTOR,
                    "Found {} candidate embeddings in {:?}", matches.len(), start.elapsed());
                Ok(matches)
            }
            Err(e) => {
                error!(target: TARGET_VECTOR, "Failed to search for similar embeddings: {:?}", e);
                Err(anyhow::anyhow!(
                    "Qdrant search on {} failed: {}",
                    self.collection,
                    e
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::PointId;

    fn string_value(s: &str) -> QdrantValue {
        QdrantValue {
            kind: Some(Kind::StringValue(s.to_string())),
        }
    }

    fn integer_value(i: i64) -> QdrantValue {
        QdrantValue {
            kind: Some(Kind::IntegerValue(i)),
        }
    }

    #[test]
    fn test_point_to_candidate() {
        let mut payload = HashMap::new();
        payload.insert("key".to_string(), string_value("bbc_2025-10-777"));
        payload.insert("created_at".to_string(), string_value("2025-10-12T09:00:00Z"));
        payload.insert("cluster_id".to_string(), integer_value(4));

        let point = ScoredPoint {
            id: Some(PointId {
                point_id_options: Some(PointIdOptions::Num(31)),
            }),
            payload,
            score: 0.875,
            ..Default::default()
        };

        let candidate = point_to_candidate(point);
        assert_eq!(candidate.id, "31");
        assert_eq!(candidate.key.as_deref(), Some("bbc_2025-10-777"));
        assert_eq!(candidate.similarity, 0.875);
        assert_eq!(candidate.cluster_id, Some(4));
        assert!(candidate.created_at.is_some());
    }

    #[test]
    fn test_point_without_payload() {
        let point = ScoredPoint {
            id: Some(PointId {
                point_id_options: Some(PointIdOptions::Uuid(
                    "5c56c793-69f3-4fbf-87e6-c4bf54c28c26".to_string(),
                )),
            }),
            score: 0.5,
            ..Default::default()
        };

        let candidate = point_to_candidate(point);
        assert_eq!(candidate.id, "5c56c793-69f3-4fbf-87e6-c4bf54c28c26");
        assert!(candidate.key.is_none());
        assert!(candidate.cluster_id.is_none());
        assert!(candidate.created_at.is_none());
    }
}
