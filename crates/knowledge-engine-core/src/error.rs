//! Error taxonomy shared by every engine operation.
//!
//! Each [`EngineError`] carries a machine-readable [`ErrorKind`] and a
//! human-readable message. Callers branch on the kind (e.g. to map it to a
//! status code) and show the message.

use serde::Serialize;
use thiserror::Error;

/// Convenience alias used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Stable classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    ScoringBackend,
    Storage,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ScoringBackend => "scoring_backend",
            ErrorKind::Storage => "storage",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed, empty, or oversized input. The caller's fault.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A concurrent ingestion of the same document is in flight.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The relevance backend failed, timed out, or returned an out-of-range score.
    #[error("scoring backend error: {0}")]
    ScoringBackend(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn scoring(msg: impl Into<String>) -> Self {
        EngineError::ScoringBackend(msg.into())
    }

    pub fn storage(msg: impl std::fmt::Display) -> Self {
        EngineError::Storage(msg.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::ScoringBackend(_) => ErrorKind::ScoringBackend,
            EngineError::Storage(_) => ErrorKind::Storage,
            EngineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the caller may retry the same request with backoff.
    ///
    /// Only conflicts qualify; validation and not-found errors are
    /// deterministic and backend failures abort the query outright.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(format!("metadata encoding: {}", e))
    }
}
