use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument, warn};

use super::core::{Database, DbLockErrorExt};
use crate::articles::{index_by_news_id, ArticleRecord};
use crate::TARGET_DB;

#[derive(sqlx::FromRow)]
struct ArticleRow {
    id: String,
    news_id: Option<String>,
    headline: String,
    description: Option<String>,
    image: Option<String>,
    published_at: Option<String>,
    source: Option<String>,
    original_link: Option<String>,
    trust_score: Option<f64>,
    confidence_level: Option<f64>,
    category: Option<String>,
    content: Option<String>,
}

/// JSON columns are stored as text; a value that does not parse is kept as a string.
fn json_column(raw: Option<String>) -> Option<Value> {
    raw.map(|text| serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

impl From<ArticleRow> for ArticleRecord {
    fn from(row: ArticleRow) -> Self {
        ArticleRecord {
            id: row.id,
            news_id: row.news_id,
            headline: row.headline,
            description: row.description,
            image: row.image,
            published_at: row.published_at,
            source: json_column(row.source),
            original_link: row.original_link,
            trust_score: row.trust_score,
            confidence_level: row.confidence_level,
            category: json_column(row.category),
            content: row.content,
        }
    }
}

impl Database {
    /// Inserts an article, or replaces the stored copy with the same `id`.
    #[instrument(target = "db_query", level = "info", skip(self, article), fields(id = %article.id))]
    pub async fn upsert_article(&self, article: &ArticleRecord) -> Result<(), sqlx::Error> {
        debug!(target: TARGET_DB, "Adding/updating article: {}", article.headline);

        let source = article.source.as_ref().map(Value::to_string);
        let category = article.category.as_ref().map(Value::to_string);

        let mut backoff = 100; // initial delay in milliseconds
        let max_retries = 5;

        for attempt in 1..=max_retries {
            match sqlx::query(
                r#"
                INSERT INTO news_articles (id, news_id, headline, description, image, published_at, source, original_link, trust_score, confidence_level, category, content)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(id) DO UPDATE SET
                    news_id = excluded.news_id,
                    headline = excluded.headline,
                    description = excluded.description,
                    image = excluded.image,
                    published_at = excluded.published_at,
                    source = excluded.source,
                    original_link = excluded.original_link,
                    trust_score = excluded.trust_score,
                    confidence_level = excluded.confidence_level,
                    category = excluded.category,
                    content = excluded.content
                "#,
            )
            .bind(&article.id)
            .bind(&article.news_id)
            .bind(&article.headline)
            .bind(&article.description)
            .bind(&article.image)
            .bind(&article.published_at)
            .bind(&source)
            .bind(&article.original_link)
            .bind(article.trust_score)
            .bind(article.confidence_level)
            .bind(&category)
            .bind(&article.content)
            .execute(self.pool())
            .await
            {
                Ok(_) => {
                    debug!(target: TARGET_DB, "Article stored: {}", article.id);
                    return Ok(());
                }
                Err(err) if err.is_database_lock_error() && attempt < max_retries => {
                    info!(target: TARGET_DB, "Database is locked, waiting {}ms before retrying attempt {}/{}: {}", backoff, attempt, max_retries, article.id);
                    sleep(Duration::from_millis(backoff)).await;
                    backoff = backoff.saturating_mul(2); // exponential backoff
                }
                Err(err) => {
                    error!(target: TARGET_DB, "Failed to store article {}: {}", article.id, err);
                    return Err(err);
                }
            }
        }

        Err(sqlx::Error::Protocol(
            "Maximum retries exceeded for storing article".into(),
        ))
    }

    /// Loads all articles whose `news_id` is in `ids` with a single query.
    #[instrument(target = "db_query", level = "info", skip(self, ids), fields(count = ids.len()))]
    pub async fn get_articles_by_news_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<ArticleRecord>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, news_id, headline, description, image, published_at, source, original_link, trust_score, confidence_level, category, content FROM news_articles WHERE news_id IN (",
        );
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");

        let rows: Vec<ArticleRow> = query.build_query_as().fetch_all(self.pool()).await?;
        if rows.len() < ids.len() {
            warn!(target: TARGET_DB, "Found {} of {} requested articles", rows.len(), ids.len());
        }

        Ok(rows.into_iter().map(ArticleRecord::from).collect())
    }

    /// Batch lookup keyed by `news_id`, as used by the article joiner.
    pub async fn fetch_articles(
        &self,
        ids: &[String],
    ) -> anyhow::Result<HashMap<String, ArticleRecord>> {
        let articles = self.get_articles_by_news_ids(ids).await?;
        Ok(index_by_news_id(articles))
    }
}
