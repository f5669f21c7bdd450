//! Error types for the permission engine

use thiserror::Error;

/// Permission engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    /// Malformed identifier, unknown permission reference, or bad enum value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Entity requested by exact key does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate creation, referential-integrity violation, or stale version
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Persistence collaborator failed or timed out
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Coarse error classification for transport-layer mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    Unavailable,
}

impl AuthzError {
    /// Stale-version write against `entity`
    pub fn stale_version(entity: impl std::fmt::Display, expected: u64, actual: u64) -> Self {
        Self::Conflict(format!(
            "stale version for {}: expected {}, found {}",
            entity, expected, actual
        ))
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// Whether re-reading and retrying the same call can succeed.
    ///
    /// The engine never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Conflict(msg) => msg.starts_with("stale version"),
            _ => false,
        }
    }
}

/// Result type for permission engine operations
pub type Result<T> = std::result::Result<T, AuthzError>;
