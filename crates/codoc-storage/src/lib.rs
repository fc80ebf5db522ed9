//! Document byte stores for codoc
//!
//! The session layer treats persistence as an external collaborator:
//! load the encoded document bytes for an id, store the bytes back.
//! Two backends are provided:
//! - Memory (default): fast, volatile, for development and tests
//! - SQLite: embedded persistence behind the `sqlite` feature

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;

/// External document store capability.
///
/// Keys are opaque document-id strings; values are the opaque encoded
/// document state. Implementations must be safe to call concurrently
/// from many connection tasks.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load the stored bytes for a document, if any.
    async fn load(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store (insert or replace) the bytes for a document.
    async fn store(&self, id: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Delete a document. Returns whether anything was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Check whether a document exists.
    async fn exists(&self, id: &str) -> Result<bool, StoreError>;
}

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
