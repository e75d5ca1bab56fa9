use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Storage unavailable or the request failed at the transport level.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human readable description of the failure.
        message: String,
        /// Backend-specific cause.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A versioned write lost a race: the stored document changed since it
    /// was read. Callers re-read and retry.
    #[error("document `{id}` was modified concurrently")]
    Conflict {
        /// Identifier of the contended document.
        id: String,
    },
    /// An insert targeted an identifier that already exists.
    #[error("document `{id}` already exists")]
    AlreadyExists {
        /// Identifier of the duplicate document.
        id: String,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a conflict error for the given document identifier.
    pub fn conflict(id: impl Into<String>) -> Self {
        StorageError::Conflict { id: id.into() }
    }

    /// Construct a duplicate-insert error for the given document identifier.
    pub fn already_exists(id: impl Into<String>) -> Self {
        StorageError::AlreadyExists { id: id.into() }
    }
}
