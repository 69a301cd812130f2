use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the MemoRAG engine
#[derive(Error, Debug)]
pub enum MemoragError {
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

    /// A query term matched several catalog entries with similar confidence
    #[error("Ambiguous {field} '{token}': could be any of {candidates:?}")]
    AmbiguousEntity {
        field: String,
        token: String,
        candidates: Vec<String>,
    },

    /// Follow-up phrasing with nothing to follow up on
    #[error("Follow-up question without prior context: {text}")]
    MalformedFollowup { text: String },

    /// Query text that cannot be processed at all
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Embedding, index or generation backend failure
    #[error("External service unavailable: {service}: {message}")]
    ExternalServiceUnavailable { service: String, message: String },

    /// Memory persistence errors
    #[error("Memory persistence error: {0}")]
    Persistence(String),

    /// Record id not present in the store
    #[error("Record not found: {id}")]
    RecordNotFound { id: String },

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

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
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

/// Result type for MemoRAG operations
pub type Result<T> = std::result::Result<T, MemoragError>;
