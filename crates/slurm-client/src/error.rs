//! Slurm client errors

use thiserror::Error;

/// Errors that can occur when interacting with slurmrestd
#[derive(Debug, Error)]
pub enum SlurmError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// slurmrestd returned an error
    #[error("Slurm API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid or expired JWT)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Node not found
    #[error("Not found: {0}")]
    NotFound(String),
}
