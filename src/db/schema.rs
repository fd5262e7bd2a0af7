use tracing::info;

use super::core::Database;
use crate::TARGET_DB;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news_articles (
                id TEXT PRIMARY KEY,
                news_id TEXT UNIQUE,
                headline TEXT NOT NULL,
                description TEXT,
                image TEXT,
                published_at TEXT,
                source TEXT, -- JSON
                original_link TEXT,
                trust_score REAL,
                confidence_level REAL,
                category TEXT, -- JSON
                content TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_news_articles_published_at ON news_articles (published_at);
            "#,
        )
        .execute(&mut *conn)
        .await?;
        info!(target: TARGET_DB, "Tables ensured to exist");

        Ok(())
    }
}
