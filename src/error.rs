//! Error types for the Ingestion Service

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Feed parse error: {0}")]
    FeedParseError(#[from] feed_rs::parser::ParseFeedError),

    #[error("API error: {code} - {message}")]
    ApiError {
        code: String,
        message: String,
    },

    #[error("Invalid data: {0}")]
    ValidationError(String),

    #[error("Document not found: {collection}/{id}")]
    NotFound {
        collection: String,
        id: String,
    },

    #[error("Invalid run transition: {0}")]
    InvalidTransition(String),

    #[error("Batch exceeds {limit} writes")]
    BatchLimitExceeded {
        limit: usize,
    },

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Storage error: {0}")]
    StorageError(String),
}

pub type Result<T> = std::result::Result<T, IngestionError>;
