use crate::embedding::EmbeddingError;
use crate::search::SearchError;
use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for visearch
#[derive(Error, Debug)]
pub enum VisearchError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Index store errors (transport, trust, request failures)
    #[error("Index store error: {0}")]
    Store(#[from] StoreError),

    /// Index schema file is unusable
    #[error("Index schema error: {0}")]
    Schema(String),

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Query engine errors
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VisearchError {
    /// True when the run failed because the index store's TLS certificate
    /// could not be verified.
    pub fn is_certificate_error(&self) -> bool {
        match self {
            Self::Store(e) => e.is_certificate_error(),
            Self::Search(SearchError::Store(e)) => e.is_certificate_error(),
            _ => false,
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for visearch operations
pub type Result<T> = std::result::Result<T, VisearchError>;
