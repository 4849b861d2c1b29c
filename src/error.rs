//! Error taxonomy for the memory substrate.
//!
//! Every library operation returns [`MemoryError`]. Surfaces (MCP tools, CLI)
//! render it as a string; [`MemoryError::is_retryable`] tells callers which
//! failures are worth another attempt.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// Malformed input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Scope violation. The message never distinguishes "missing" from "not permitted".
    #[error("not authorized: {0}")]
    Authorization(String),

    /// The embedding provider could not produce a vector after all retries.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("memory not found: {0}")]
    NotFound(String),

    /// A search exceeded its deadline and was abandoned.
    #[error("search timed out after {0} ms")]
    Timeout(u64),
}

impl MemoryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    /// Whether a caller may retry the same request (with backoff, or with an
    /// idempotency token in the case of writes).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable(_) | Self::Storage(_) | Self::Timeout(_)
        )
    }

    /// Short machine-readable code, used in audit details and tool output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Authorization(_) => "authorization_error",
            Self::EmbeddingUnavailable(_) => "embedding_unavailable",
            Self::Storage(_) => "storage_error",
            Self::NotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
        }
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(format!("invalid json: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
