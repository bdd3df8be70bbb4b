//! Error types for storage operations

use std::fmt;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Invalid configuration
    InvalidConfig(String),

    /// The backend was closed and accepts no more writes
    Closed,

    /// Backend-specific error
    BackendError(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::InvalidConfig(msg) => write!(f, "invalid storage configuration: {}", msg),
            StorageError::Closed => write!(f, "storage backend is closed"),
            StorageError::BackendError(msg) => write!(f, "storage backend error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}
