use anyhow::{bail, Context, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::environment::{parsed_var, process_env, required_var, var_or};
use crate::pipeline::SearchSettings;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HF_INFERENCE_URL: &str = "https://router.huggingface.co/hf-inference";
pub const DEFAULT_EMBEDDING_MODEL: &str = "google/embeddinggemma-300m";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.7;
pub const DEFAULT_MATCH_COUNT: u64 = 10;
pub const DEFAULT_QDRANT_COLLECTION: &str = "content_embeddings";
pub const DEFAULT_DATABASE_PATH: &str = "proofmark.db";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackendKind {
    Supabase,
    Qdrant,
}

impl FromStr for VectorBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "supabase" => Ok(Self::Supabase),
            "qdrant" => Ok(Self::Qdrant),
            other => Err(format!("unknown vector backend {:?}, expected supabase or qdrant", other)),
        }
    }
}

impl fmt::Display for VectorBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supabase => write!(f, "supabase"),
            Self::Qdrant => write!(f, "qdrant"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleBackendKind {
    Supabase,
    Sqlite,
}

impl FromStr for ArticleBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "supabase" => Ok(Self::Supabase),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown article backend {:?}, expected supabase or sqlite", other)),
        }
    }
}

impl fmt::Display for ArticleBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supabase => write!(f, "supabase"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Credentials for the hosted Supabase project.
#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
}

impl fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("service_key", &"<redacted>")
            .finish()
    }
}

/// Service configuration, read once at start-up.
#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub hf_api_key: String,
    pub hf_inference_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub match_threshold: f64,
    pub match_count: u64,
    pub vector_backend: VectorBackendKind,
    pub article_backend: ArticleBackendKind,
    pub supabase: Option<SupabaseConfig>,
    pub qdrant_url: Option<String>,
    pub qdrant_collection: String,
    pub database_path: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("hf_inference_url", &self.hf_inference_url)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_dimension", &self.embedding_dimension)
            .field("match_threshold", &self.match_threshold)
            .field("match_count", &self.match_count)
            .field("vector_backend", &self.vector_backend)
            .field("article_backend", &self.article_backend)
            .field("supabase", &self.supabase)
            .field("qdrant_url", &self.qdrant_url)
            .field("qdrant_collection", &self.qdrant_collection)
            .field("database_path", &self.database_path)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

fn checked_url(var: &str, raw: String) -> Result<String> {
    let parsed = Url::parse(&raw).with_context(|| format!("{} is not a valid URL: {}", var, raw))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("{} must be an http or https URL: {}", var, raw);
    }
    Ok(raw.trim_end_matches('/').to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(process_env)
    }

    /// Builds the configuration from `lookup`, which maps a variable name to
    /// its value. Unset and empty variables are `None`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let port = parsed_var(&lookup, "PORT", DEFAULT_PORT)?;
        let hf_api_key = required_var(&lookup, "HUGGINGFACE_API_KEY")?;
        let hf_inference_url = checked_url(
            "HF_INFERENCE_URL",
            var_or(&lookup, "HF_INFERENCE_URL", DEFAULT_HF_INFERENCE_URL),
        )?;
        let embedding_model = var_or(&lookup, "EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL);
        let embedding_dimension =
            parsed_var(&lookup, "EMBEDDING_DIMENSION", DEFAULT_EMBEDDING_DIMENSION)?;
        if embedding_dimension == 0 {
            bail!("EMBEDDING_DIMENSION must be greater than 0");
        }

        let match_threshold = parsed_var(&lookup, "MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD)?;
        if !(0.0..=1.0).contains(&match_threshold) {
            bail!("MATCH_THRESHOLD must be between 0 and 1, got {}", match_threshold);
        }
        let match_count = parsed_var(&lookup, "MATCH_COUNT", DEFAULT_MATCH_COUNT)?;
        if match_count == 0 {
            bail!("MATCH_COUNT must be greater than 0");
        }

        let vector_backend = parsed_var(&lookup, "VECTOR_BACKEND", VectorBackendKind::Supabase)?;
        let article_backend =
            parsed_var(&lookup, "ARTICLE_BACKEND", ArticleBackendKind::Supabase)?;

        let needs_supabase = vector_backend == VectorBackendKind::Supabase
            || article_backend == ArticleBackendKind::Supabase;
        let supabase = match (lookup("SB_CLOUD_URL"), needs_supabase) {
            (Some(url), _) => Some(SupabaseConfig {
                url: checked_url("SB_CLOUD_URL", url.trim().to_string())?,
                service_key: required_var(&lookup, "SB_CLOUD_SERVICE_ROLE_KEY")?,
            }),
            (None, true) => bail!("SB_CLOUD_URL environment variable required for the supabase backend"),
            (None, false) => None,
        };

        let qdrant_url = match lookup("QDRANT_URL") {
            Some(url) => Some(checked_url("QDRANT_URL", url.trim().to_string())?),
            None if vector_backend == VectorBackendKind::Qdrant => {
                bail!("QDRANT_URL environment variable required for the qdrant backend")
            }
            None => None,
        };

        let request_timeout_secs =
            parsed_var(&lookup, "REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        if request_timeout_secs == 0 {
            bail!("REQUEST_TIMEOUT_SECS must be greater than 0");
        }

        Ok(Self {
            port,
            hf_api_key,
            hf_inference_url,
            embedding_model,
            embedding_dimension,
            match_threshold,
            match_count,
            vector_backend,
            article_backend,
            supabase,
            qdrant_url,
            qdrant_collection: var_or(&lookup, "QDRANT_COLLECTION", DEFAULT_QDRANT_COLLECTION),
            database_path: var_or(&lookup, "DATABASE_PATH", DEFAULT_DATABASE_PATH),
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            match_threshold: self.match_threshold,
            match_count: self.match_count,
            expected_dimension: self.embedding_dimension,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |var| vars.get(var).cloned())
    }

    const SUPABASE: [(&str, &str); 3] = [
        ("HUGGINGFACE_API_KEY", "hf_test"),
        ("SB_CLOUD_URL", "https://abc.supabase.co/"),
        ("SB_CLOUD_SERVICE_ROLE_KEY", "service"),
    ];

    #[test]
    fn test_defaults() {
        let config = config_from(&SUPABASE).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.hf_inference_url, DEFAULT_HF_INFERENCE_URL);
        assert_eq!(config.embedding_model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.vector_backend, VectorBackendKind::Supabase);
        assert_eq!(config.article_backend, ArticleBackendKind::Supabase);
        assert_eq!(config.supabase.as_ref().unwrap().url, "https://abc.supabase.co");
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(
            config.search_settings(),
            SearchSettings {
                match_threshold: 0.7,
                match_count: 10,
                expected_dimension: 768,
            }
        );
    }

    #[test]
    fn test_api_key_is_required() {
        let err = config_from(&SUPABASE[1..]).unwrap_err();
        assert_eq!(err.to_string(), "HUGGINGFACE_API_KEY environment variable required");

        let mut pairs = SUPABASE.to_vec();
        pairs[0].1 = "  ";
        assert!(config_from(&pairs).is_err());
    }

    #[test]
    fn test_supabase_credentials_required_for_supabase_backends() {
        let err = config_from(&SUPABASE[..1]).unwrap_err();
        assert!(err.to_string().contains("SB_CLOUD_URL"));

        let err = config_from(&SUPABASE[..2]).unwrap_err();
        assert!(err.to_string().contains("SB_CLOUD_SERVICE_ROLE_KEY"));
    }

    #[test]
    fn test_local_backends() {
        let config = config_from(&[
            ("HUGGINGFACE_API_KEY", "hf_test"),
            ("VECTOR_BACKEND", "Qdrant"),
            ("ARTICLE_BACKEND", "sqlite"),
            ("QDRANT_URL", "http://localhost:6334"),
            ("DATABASE_PATH", "/tmp/articles.db"),
        ])
        .unwrap();
        assert_eq!(config.vector_backend, VectorBackendKind::Qdrant);
        assert_eq!(config.article_backend, ArticleBackendKind::Sqlite);
        assert!(config.supabase.is_none());
        assert_eq!(config.qdrant_url.as_deref(), Some("http://localhost:6334"));
        assert_eq!(config.qdrant_collection, "content_embeddings");
        assert_eq!(config.database_path, "/tmp/articles.db");

        let err = config_from(&[
            ("HUGGINGFACE_API_KEY", "hf_test"),
            ("VECTOR_BACKEND", "qdrant"),
            ("ARTICLE_BACKEND", "sqlite"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("QDRANT_URL"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (var, value) in [
            ("PORT", "eighty"),
            ("MATCH_THRESHOLD", "1.5"),
            ("MATCH_COUNT", "0"),
            ("EMBEDDING_DIMENSION", "0"),
            ("VECTOR_BACKEND", "pinecone"),
            ("HF_INFERENCE_URL", "not a url"),
            ("HF_INFERENCE_URL", "ftp://models.example"),
            ("REQUEST_TIMEOUT_SECS", "0"),
        ] {
            let mut pairs = SUPABASE.to_vec();
            pairs.push((var, value));
            assert!(config_from(&pairs).is_err(), "{}={} should be rejected", var, value);
        }
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = config_from(&SUPABASE).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hf_test"));
        assert!(!debug.contains("\"service\""));
        assert!(debug.contains("<redacted>"));
    }
}
