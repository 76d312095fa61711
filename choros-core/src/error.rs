//! Error types for Choros operations

/// Result type for Choros operations
pub type Result<T> = std::result::Result<T, ChorosError>;

/// Error types shared by the worker service and the pool manager
#[derive(Debug, thiserror::Error)]
pub enum ChorosError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Worker-side error
    #[error("Worker error: {0}")]
    Worker(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for ChorosError {
    fn from(s: String) -> Self {
        ChorosError::Other(s)
    }
}

impl From<&str> for ChorosError {
    fn from(s: &str) -> Self {
        ChorosError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for ChorosError {
    fn from(err: anyhow::Error) -> Self {
        ChorosError::Other(err.to_string())
    }
}
