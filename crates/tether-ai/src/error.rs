//! Error types for the AI client crate.

use thiserror::Error;

/// Result type alias using the AI error type.
pub type Result<T> = std::result::Result<T, AiError>;

/// Errors produced by AI completion clients.
#[derive(Debug, Error)]
pub enum AiError {
    /// Backend/API error from the provider.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Configuration error (unknown provider, missing key, etc.).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
