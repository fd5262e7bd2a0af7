pub mod app_api;
pub mod articles;
pub mod config;
pub mod db;
pub mod environment;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod supabase;
pub mod util;
pub mod vector;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_EMBEDDING: &str = "embedding";
pub const TARGET_DB: &str = "db_query";

pub use error::SearchError;
pub use pipeline::{SearchPipeline, SearchQuery, SearchSettings};
