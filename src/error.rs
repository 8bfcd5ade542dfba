//! Error types for tldw.

use crate::generation::GenerationError;
use thiserror::Error;

/// Library-level error type for tldw operations.
#[derive(Error, Debug)]
pub enum TldwError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid job payload: {0}")]
    InvalidJob(String),

    #[error("Caption source error: {0}")]
    CaptionSource(String),

    #[error("No captions available: {0}")]
    NoCaptions(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("Resource store error: {0}")]
    Store(#[from] StoreError),

    #[error("Key-value store error: {0}")]
    KeyValue(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("Timed out after {0:?} waiting for completion")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Errors from the relational resource store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique constraint rejected the write; another writer got there first.
    #[error("Conflicting record already exists: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Failed to acquire connection: {0}")]
    Connection(String),
}

impl TldwError {
    /// Whether another attempt of the same job could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TldwError::Generation(e) => e.is_retryable(),
            TldwError::Config(_)
            | TldwError::InvalidInput(_)
            | TldwError::InvalidJob(_)
            | TldwError::ToolNotFound(_)
            | TldwError::NoCaptions(_)
            | TldwError::TomlParse(_) => false,
            TldwError::Store(StoreError::Corrupt(_)) => false,
            _ => true,
        }
    }
}

/// Result type alias for tldw operations.
pub type Result<T> = std::result::Result<T, TldwError>;
