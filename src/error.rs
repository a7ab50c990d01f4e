//! Domain-specific error types for chefboost

use thiserror::Error;

/// Main error type for the chefboost retrieval and streaming core
#[derive(Error, Debug)]
pub enum ChefBoostError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Embedding provider error: {message}")]
    Embedding { message: String },

    #[error("Language model error: {message}")]
    Llm { message: String },

    /// The document store failed or timed out. Never retried inside retrieval.
    #[error("Retrieval unavailable: {message}")]
    RetrievalUnavailable { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ChefBoostError {
    /// Collapse store-side failures into the one condition retrieval callers see.
    pub fn into_retrieval_unavailable(self) -> Self {
        match self {
            ChefBoostError::RetrievalUnavailable { .. } => self,
            ChefBoostError::Timeout {
                operation,
                timeout_ms,
            } => ChefBoostError::RetrievalUnavailable {
                message: format!("{operation} timed out after {timeout_ms}ms"),
            },
            other => ChefBoostError::RetrievalUnavailable {
                message: other.to_string(),
            },
        }
    }
}

impl From<anyhow::Error> for ChefBoostError {
    fn from(err: anyhow::Error) -> Self {
        ChefBoostError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ChefBoostError {
    fn from(err: serde_json::Error) -> Self {
        ChefBoostError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<surrealdb::Error> for ChefBoostError {
    fn from(err: surrealdb::Error) -> Self {
        ChefBoostError::Database {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ChefBoostError {
    fn from(err: reqwest::Error) -> Self {
        ChefBoostError::Llm {
            message: format!("HTTP request failed: {}", err),
        }
    }
}

impl From<chrono::ParseError> for ChefBoostError {
    fn from(err: chrono::ParseError) -> Self {
        ChefBoostError::Validation {
            message: format!("Date parsing error: {}", err),
        }
    }
}

/// Result type alias for chefboost operations
pub type Result<T> = std::result::Result<T, ChefBoostError>;
