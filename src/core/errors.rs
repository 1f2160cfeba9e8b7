//! Custom error types for translation operations

use thiserror::Error;

use crate::core::models::Stage;

/// Translation-related errors
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Malformed terminology table or document
    #[error("Format error: {path} - {message}")]
    FormatError {
        path: String,
        message: String,
    },

    /// Language-model call failed after all retries
    #[error("Service error during {stage}: {message}")]
    ServiceError {
        stage: Stage,
        message: String,
    },

    /// API request failed
    #[error("API error: {status} - {message}")]
    ApiError {
        status: u16,
        message: String,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded. Retry after {retry_after:?} seconds")]
    RateLimitError {
        retry_after: Option<u64>,
    },

    /// Network error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
    },

    /// Invalid or empty response from API
    #[error("Invalid response: {message}")]
    InvalidResponseError {
        message: String,
    },

    /// Request timeout
    #[error("Request timeout after {timeout_ms} ms")]
    TimeoutError {
        timeout_ms: u64,
    },

    /// File operation error
    #[error("File error: {path} - {message}")]
    FileError {
        path: String,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// Operator aborted the batch
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Reqwest error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Layered configuration error
    #[error("Configuration source error: {0}")]
    ConfigSourceError(#[from] config::ConfigError),
}

impl TranslationError {
    /// Shorthand for a format error on a path
    pub fn format(path: impl Into<String>, message: impl Into<String>) -> Self {
        TranslationError::FormatError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        TranslationError::ConfigError {
            message: message.into(),
        }
    }

    /// Whether another attempt of the same call could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslationError::NetworkError { .. }
            | TranslationError::TimeoutError { .. }
            | TranslationError::RateLimitError { .. }
            | TranslationError::InvalidResponseError { .. }
            | TranslationError::HttpError(_) => true,
            TranslationError::ApiError { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }
}

/// Result type for translation operations
pub type Result<T> = std::result::Result<T, TranslationError>;
