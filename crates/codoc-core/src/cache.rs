//! Document instance cache
//!
//! Lazily creates one CRDT engine per document id, backed by the
//! external byte store, and drops the instance when its room empties so
//! memory stays bounded by active rooms.

use crate::document::DocumentId;
use crate::engine::DocEngine;
use crate::error::{Error, Result};
use crate::presence::PresenceRegistry;
use codoc_storage::DocumentStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

type EngineCell = Arc<OnceCell<Arc<DocEngine>>>;

/// Cache of live CRDT engines, one per document with members.
pub struct DocumentCache {
    store: Arc<dyn DocumentStore>,
    docs: DashMap<DocumentId, EngineCell>,
}

impl DocumentCache {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            docs: DashMap::new(),
        }
    }

    /// Get the cached engine for a document, loading it from the store
    /// on first access.
    ///
    /// A document with no stored bytes starts as a fresh empty state
    /// (creation-on-first-access, not an error). Concurrent first
    /// accesses share one load: the per-document cell is a
    /// single-flight guard, and the store I/O runs without any registry
    /// lock held.
    pub async fn get(&self, id: &DocumentId) -> Result<Arc<DocEngine>> {
        let cell: EngineCell = self
            .docs
            .entry(id.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        let engine = cell
            .get_or_try_init(|| async {
                let engine = match self.store.load(id.as_str()).await? {
                    Some(bytes) => DocEngine::from_update(&bytes)?,
                    None => {
                        debug!(doc = %id, "No stored state, starting empty");
                        DocEngine::new()
                    }
                };
                info!(doc = %id, "Document instance loaded");
                Ok::<_, Error>(Arc::new(engine))
            })
            .await?;

        Ok(Arc::clone(engine))
    }

    /// Apply an update and persist the post-apply state.
    ///
    /// Guests are rejected without mutation (`Ok(false)`). For
    /// authenticated writers the update is applied in memory first and
    /// the full encoded state is then written to the store before the
    /// update counts as accepted. A store failure surfaces as a
    /// retryable error; the in-memory instance keeps the applied update
    /// so the authoritative state never regresses.
    pub async fn apply_and_persist(
        &self,
        id: &DocumentId,
        update: &[u8],
        writer_is_guest: bool,
    ) -> Result<bool> {
        if writer_is_guest {
            return Ok(false);
        }

        let engine = self.get(id).await?;
        engine.apply_update(update)?;

        let state = engine.encode_full();
        if let Err(e) = self.store.store(id.as_str(), &state).await {
            warn!(doc = %id, error = %e, "Failed to persist document state");
            return Err(Error::Persistence(e));
        }

        Ok(true)
    }

    /// Drop the cached engine if the document's room has no presence.
    ///
    /// Called after every leave/disconnect/eviction rather than on a
    /// timer. Returns whether an instance was released.
    pub fn evict_if_empty(&self, id: &DocumentId, presence: &PresenceRegistry) -> bool {
        if !presence.is_empty(id) {
            return false;
        }
        let evicted = self.docs.remove(id).is_some();
        if evicted {
            info!(doc = %id, "Document instance evicted");
        }
        evicted
    }

    /// Whether an engine is currently cached for this document.
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.docs
            .get(id)
            .is_some_and(|cell| cell.initialized())
    }
}
