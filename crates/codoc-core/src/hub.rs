//! Hub - the shared state handed to every connection task

use crate::broadcast::Broadcaster;
use crate::cache::DocumentCache;
use crate::connection::{ConnectionId, ConnectionRegistry, Payload};
use crate::document::DocumentId;
use crate::identity::ParticipantKey;
use crate::presence::{Participant, PresenceRegistry};
use codoc_storage::DocumentStore;
use std::sync::Arc;
use tracing::info;

/// Aggregate of the process-wide session state: connection registry,
/// presence registry, broadcaster and document cache. One `Arc<Hub>` is
/// shared by every transport adapter and the liveness sweeper.
pub struct Hub {
    pub connections: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceRegistry>,
    pub cache: Arc<DocumentCache>,
    broadcaster: Broadcaster,
}

impl Hub {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        Self {
            broadcaster: Broadcaster::new(connections.clone()),
            presence: Arc::new(PresenceRegistry::new()),
            cache: Arc::new(DocumentCache::new(store)),
            connections,
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Fan a payload out to a room, excluding an optional sender.
    pub fn broadcast(
        &self,
        doc: &DocumentId,
        payload: Payload,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        self.broadcaster.broadcast(doc, payload, exclude)
    }

    /// Run the cache eviction check for a document.
    pub fn evict_if_empty(&self, doc: &DocumentId) -> bool {
        self.cache.evict_if_empty(doc, &self.presence)
    }

    /// Tear down a closed connection: remove its presence entry from
    /// every room it belonged to and run the eviction check for each.
    ///
    /// Idempotent; returns the departures the caller should announce.
    pub fn disconnect(
        &self,
        conn: &ConnectionId,
    ) -> Vec<(DocumentId, ParticipantKey, Participant)> {
        let identity = self.connections.identity(conn);
        let rooms = self.connections.unregister(conn);
        let mut departures = Vec::new();

        if let Some(identity) = identity {
            let key = identity.participant_key();
            for doc in rooms {
                if let Some(participant) = self.presence.leave(&doc, &key) {
                    departures.push((doc.clone(), key, participant));
                }
                self.evict_if_empty(&doc);
            }
            if !departures.is_empty() {
                info!(client = %conn, rooms = departures.len(), "Connection torn down");
            }
        }

        departures
    }
}
