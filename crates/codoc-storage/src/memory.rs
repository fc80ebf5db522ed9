//! In-memory document store

use crate::{DocumentStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

/// In-memory document store
///
/// Fast, volatile storage suitable for development and tests.
/// Data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    data: DashMap<String, Vec<u8>>,
    /// Ids in store order, used by tests to assert the write path ran.
    write_log: Mutex<Vec<String>>,
    /// When set, every `store` call fails. Test hook for the
    /// persistence-failure path.
    fail_writes: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids passed to `store`, in call order.
    pub fn write_log(&self) -> Vec<String> {
        self.write_log.lock().clone()
    }

    /// Make subsequent `store` calls fail with a database error.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.get(id).map(|entry| entry.value().clone()))
    }

    async fn store(&self, id: &str, data: &[u8]) -> Result<(), StoreError> {
        if *self.fail_writes.lock() {
            return Err(StoreError::Database("write failure injected".into()));
        }
        self.write_log.lock().push(id.to_string());
        self.data.insert(id.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.data.remove(id).is_some())
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.data.contains_key(id))
    }
}
