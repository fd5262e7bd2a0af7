use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::articles::ArticleRecord;
use crate::util::{lenient_timestamp, string_or_number};

/// What the text being embedded is used for. Validated and echoed back to the
/// caller; the text itself is embedded unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    #[default]
    Query,
    Document,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(Self::Query),
            "document" => Ok(Self::Document),
            _ => Err("Type must be \"query\" or \"document\"".to_string()),
        }
    }
}

/// One row returned by the nearest-neighbour search.
///
/// There is one row per stored embedding, not per article: an article that was
/// ingested more than once shows up once per ingestion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CandidateMatch {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub key: Option<String>,
    pub similarity: f64,
    #[serde(default)]
    pub cluster_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A surviving candidate after deduplication, optionally joined to its article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupedResult {
    pub similarity: f64,
    pub embedding_id: String,
    pub key: String,
    pub base_key: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub cluster_id: Option<i64>,
    pub article: Option<ArticleRecord>,
}

/// The response body of a search.
///
/// `order` gives the display order; `results_by_key` allows lookups by the same keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub order: Vec<String>,
    #[serde(rename = "resultsByKey")]
    pub results_by_key: BTreeMap<String, DedupedResult>,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_embedding_kind_parsing() {
        assert_eq!("query".parse::<EmbeddingKind>(), Ok(EmbeddingKind::Query));
        assert_eq!(
            "document".parse::<EmbeddingKind>(),
            Ok(EmbeddingKind::Document)
        );
        assert_eq!(
            "Query".parse::<EmbeddingKind>(),
            Err("Type must be \"query\" or \"document\"".to_string())
        );
    }

    #[test]
    fn test_embedding_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_value(EmbeddingKind::Document).unwrap(), json!("document"));
        assert_eq!(EmbeddingKind::default().to_string(), "query");
    }

    #[test]
    fn test_candidate_from_rpc_row() {
        let row = json!({
            "id": "6f1c",
            "key": "reuters_2025-10-12345",
            "similarity": 0.83,
            "cluster_id": 7,
            "created_at": "2025-10-12T09:00:00.123456+00:00",
            "content": "ignored",
            "metadata": {}
        });
        let candidate: CandidateMatch = serde_json::from_value(row).unwrap();
        assert_eq!(candidate.id, "6f1c");
        assert_eq!(candidate.key.as_deref(), Some("reuters_2025-10-12345"));
        assert_eq!(candidate.cluster_id, Some(7));
        assert!(candidate.created_at.is_some());

        let sparse: CandidateMatch =
            serde_json::from_value(json!({ "id": 3, "key": null, "similarity": 0.7 })).unwrap();
        assert_eq!(sparse.id, "3");
        assert!(sparse.key.is_none());
        assert!(sparse.cluster_id.is_none());
        assert!(sparse.created_at.is_none());
    }
}
