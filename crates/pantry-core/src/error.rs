use thiserror::Error;

/// Top-level error type for the Pantry retrieval core.
///
/// Variants follow the failure taxonomy of the ingest and search paths. The
/// retry helpers consult [`PantryError::is_retryable`] to decide whether an
/// operation is worth another attempt.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PantryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PantryError {
    /// Whether a failed call may succeed if attempted again.
    ///
    /// Transport-level failures (embedder, index store, timeouts) are
    /// transient. Data and caller errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PantryError::EmbeddingService(_)
                | PantryError::IndexUnavailable(_)
                | PantryError::Timeout { .. }
        )
    }

    /// Report a timeout as a failure of the service that stalled.
    ///
    /// Other errors pass through unchanged.
    pub fn attribute_timeout(self, service: fn(String) -> PantryError) -> PantryError {
        match self {
            timeout @ PantryError::Timeout { .. } => service(timeout.to_string()),
            other => other,
        }
    }

    /// Short reason string recorded in ingest summaries.
    pub fn reason(&self) -> String {
        match self {
            PantryError::MalformedRecord(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}

impl From<toml::de::Error> for PantryError {
    fn from(err: toml::de::Error) -> Self {
        PantryError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for PantryError {
    fn from(err: toml::ser::Error) -> Self {
        PantryError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for PantryError {
    fn from(err: serde_json::Error) -> Self {
        PantryError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Pantry operations.
pub type Result<T> = std::result::Result<T, PantryError>;
