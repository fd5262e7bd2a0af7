use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;

use crate::db::Database;
use crate::supabase::SupabaseClient;

/// A published article as stored in the `news_articles` table.
///
/// Serialized with the column names, so clients see the row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: String,
    pub news_id: Option<String>,
    pub headline: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub published_at: Option<String>,
    pub source: Option<Value>,
    pub original_link: Option<String>,
    pub trust_score: Option<f64>,
    pub confidence_level: Option<f64>,
    pub category: Option<Value>,
    pub content: Option<String>,
}

/// Read access to articles by their stable identity (`news_id`).
pub trait ArticleStore: Send + Sync {
    /// Fetches every article whose identity is in `ids`, keyed by identity.
    ///
    /// Identities without an article are simply absent from the map.
    fn fetch_articles(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, ArticleRecord>>> + Send;
}

/// The configured article store.
pub enum ArticleBackend {
    Supabase(SupabaseClient),
    Sqlite(Database),
}

impl ArticleStore for ArticleBackend {
    async fn fetch_articles(&self, ids: &[String]) -> Result<HashMap<String, ArticleRecord>> {
        match self {
            Self::Supabase(client) => client.fetch_articles(ids).await,
            Self::Sqlite(db) => db.fetch_articles(ids).await,
        }
    }
}

/// Indexes articles by identity, ignoring rows that have none.
pub fn index_by_news_id(articles: Vec<ArticleRecord>) -> HashMap<String, ArticleRecord> {
    articles
        .into_iter()
        .filter_map(|article| article.news_id.clone().map(|id| (id, article)))
        .collect()
}
