//! Error types for rago

use thiserror::Error;

/// Result type alias using RagoError
pub type Result<T> = std::result::Result<T, RagoError>;

/// Error type alias for convenience
pub type Error = RagoError;

/// Exit codes for CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const NOT_FOUND: i32 = 2;
    pub const INVALID_INPUT: i32 = 3;
}

/// Main error type for rago
#[derive(Debug, Error)]
pub enum RagoError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Too many tool calls: {requested} exceeds limit of {limit}")]
    TooManyToolCalls { requested: usize, limit: usize },

    #[error("Partial ingest failure: {succeeded} of {total} chunks persisted: {message}")]
    PartialFailure {
        succeeded: usize,
        total: usize,
        message: String,
    },

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Fatal internal error: {0}")]
    Fatal(String),

    #[error("LLM provider error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RagoError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => exit_codes::NOT_FOUND,
            Self::InvalidInput(_) | Self::InvalidWorkflow(_) | Self::Config(_) => {
                exit_codes::INVALID_INPUT
            }
            _ => exit_codes::GENERAL_ERROR,
        }
    }

    /// Whether retrying this error is likely to help (transient vs. permanent)
    pub fn is_retryable(&self) -> bool {
        let message = self.to_string().to_lowercase();
        !(message.contains("not found")
            || message.contains("validation failed")
            || message.contains("disabled")
            || message.contains("invalid")
            || message.contains("unauthorized")
            || message.contains("forbidden"))
    }
}
