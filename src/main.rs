use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proofmark::app_api::app_api_loop;
use proofmark::articles::ArticleRecord;
use proofmark::config::{Config, DEFAULT_DATABASE_PATH};
use proofmark::db::Database;
use proofmark::environment::process_env;
use proofmark::logging::configure_logging;
use proofmark::pipeline::{SearchRequest, ServicePipeline};
use proofmark::vector::EmbeddingKind;
use proofmark::TARGET_DB;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Parser)]
#[clap(
    name = "proofmark",
    version,
    about = "Similarity search over fact-checked news articles"
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Port to listen on (overrides PORT)
        #[clap(short, long)]
        port: Option<u16>,
    },

    /// Run a single search and print the results as JSON
    Search {
        /// Text to search for
        #[clap(required = true)]
        text: String,

        /// Embedding task type: query or document
        #[clap(short = 't', long = "type", default_value = "query")]
        kind: String,

        /// Minimum similarity (0.0-1.0)
        #[clap(long)]
        threshold: Option<f64>,

        /// Maximum number of candidates to retrieve (1-100)
        #[clap(short, long)]
        count: Option<i64>,
    },

    /// Embed text and print a summary of the vector
    Embed {
        /// Text to embed
        #[clap(required = true)]
        text: String,

        /// Embedding task type: query or document
        #[clap(short = 't', long = "type", default_value = "query")]
        kind: String,
    },

    /// Load a JSON array of articles into the local SQLite store
    ImportArticles {
        /// Path to the JSON file
        #[clap(required = true)]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging();

    let args = Cli::parse();

    match args.command {
        Commands::Serve { port } => {
            let mut config = Config::from_env()?;
            if let Some(port) = port {
                config.port = port;
            }
            app_api_loop(config).await?;
        }
        Commands::Search {
            text,
            kind,
            threshold,
            count,
        } => {
            let request = SearchRequest {
                query: Some(Value::String(text)),
                kind: Some(Value::String(kind)),
                match_threshold: threshold.map(Value::from),
                match_count: count.map(Value::from),
            };
            let query = request.validate()?;
            let pipeline = ServicePipeline::from_config(&Config::from_env()?).await?;
            let envelope = pipeline.search(&query).await?;
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        Commands::Embed { text, kind } => {
            let kind: EmbeddingKind = kind.parse().map_err(anyhow::Error::msg)?;
            let pipeline = ServicePipeline::from_config(&Config::from_env()?).await?;
            let embedding = pipeline.embed(&text).await?;
            print_embedding_summary(&embedding, kind);
        }
        Commands::ImportArticles { path } => {
            import_articles(&path).await?;
        }
    }

    Ok(())
}

fn print_embedding_summary(embedding: &[f32], kind: EmbeddingKind) {
    let preview: Vec<String> = embedding.iter().take(8).map(|v| format!("{:.4}", v)).collect();
    let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();

    println!("type:      {}", kind);
    println!("dimension: {}", embedding.len());
    println!("l2 norm:   {:.4}", norm);
    println!("head:      [{}, ...]", preview.join(", "));
}

/// Reads the articles in `path` and upserts them into `DATABASE_PATH`.
async fn import_articles(path: &str) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path))?;
    let articles: Vec<ArticleRecord> =
        serde_json::from_str(&raw).with_context(|| format!("{} is not a JSON array of articles", path))?;

    // Only the database location is needed here, not the full service configuration.
    let database_path =
        process_env("DATABASE_PATH").unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string());
    let db = Database::new(&database_path)
        .await
        .with_context(|| format!("Failed to open {}", database_path))?;

    let mut stored = 0;
    for article in &articles {
        if article.news_id.is_none() {
            warn!(target: TARGET_DB, "Article {} has no news_id and cannot be matched", article.id);
        }
        db.upsert_article(article)
            .await
            .with_context(|| format!("Failed to store article {}", article.id))?;
        stored += 1;
    }

    info!(target: TARGET_DB, "Imported {} articles into {}", stored, database_path);
    Ok(())
}
