use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::TARGET_WEB_REQUEST;

/// Failures of the search pipeline, one variant per stage.
///
/// Every variant aborts the request. Only `Validation` is the caller's fault and
/// maps to 400; everything else is a 500.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("{0}")]
    Validation(String),
    #[error("{reason}: {preview}")]
    InvalidShape { reason: String, preview: String },
    #[error("Failed to generate query embedding: {source:#}")]
    Embedding {
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to perform similarity search: {source:#}")]
    Retrieval {
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to fetch matching articles: {source:#}")]
    Join {
        #[source]
        source: anyhow::Error,
    },
}

impl SearchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn embedding(source: anyhow::Error) -> Self {
        Self::Embedding { source }
    }

    pub fn retrieval(source: anyhow::Error) -> Self {
        Self::Retrieval { source }
    }

    pub fn join(source: anyhow::Error) -> Self {
        Self::Join { source }
    }

    /// The upstream error chain, one cause per line; errors raised here have
    /// no chain beyond their own message.
    pub fn stack(&self) -> String {
        match self {
            Self::Embedding { source } | Self::Retrieval { source } | Self::Join { source } => {
                format!("{:?}", source)
            }
            _ => self.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Validation(message) => {
                warn!(target: TARGET_WEB_REQUEST, "Rejected request: {}", message);
                json!({ "error": message })
            }
            _ => {
                error!(target: TARGET_WEB_REQUEST, "Request failed: {}\n{}", self, self.stack());
                json!({
                    "error": self.to_string(),
                    "stack": self.stack(),
                })
            }
        };
        (status, Json(body)).into_response()
    }
}
