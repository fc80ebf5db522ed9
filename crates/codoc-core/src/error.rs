//! Error types for codoc Core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid document ID: {0}")]
    InvalidDocumentId(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] codoc_storage::StoreError),
}

impl Error {
    /// Whether the caller should retry the failed operation.
    ///
    /// Only store failures are retryable: the in-memory state has
    /// already advanced and a later write can catch the store up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Persistence(_))
    }
}

/// Result type alias for codoc Core operations
pub type Result<T> = std::result::Result<T, Error>;
