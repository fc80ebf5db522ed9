//! Connection registry - live connections and their room membership

use crate::document::DocumentId;
use crate::identity::Identity;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Opaque connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One outbound message, serialized once and cloned cheaply per recipient.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Control-channel message (JSON event).
    Text(Arc<str>),
    /// Sync-channel message (binary frame).
    Binary(Bytes),
}

impl Payload {
    pub fn text(s: impl Into<Arc<str>>) -> Self {
        Payload::Text(s.into())
    }

    pub fn binary(b: impl Into<Bytes>) -> Self {
        Payload::Binary(b.into())
    }
}

struct ConnectionEntry {
    identity: Identity,
    sender: mpsc::UnboundedSender<Payload>,
    rooms: HashSet<DocumentId>,
}

/// Registry of live connections.
///
/// Owns each connection for its lifetime: identity, the injected send
/// capability, and the set of document rooms the connection has joined.
/// All maps are sharded by key, so unrelated connections and documents
/// never contend.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    rooms: DashMap<DocumentId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection with its outbound send capability.
    pub fn register(
        &self,
        identity: Identity,
        sender: mpsc::UnboundedSender<Payload>,
    ) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.insert(
            id,
            ConnectionEntry {
                identity,
                sender,
                rooms: HashSet::new(),
            },
        );
        debug!(client = %id, "Connection registered");
        id
    }

    /// Remove a connection, returning the rooms it belonged to.
    ///
    /// Idempotent: removing an unknown connection returns an empty list.
    pub fn unregister(&self, id: &ConnectionId) -> Vec<DocumentId> {
        let Some((_, entry)) = self.connections.remove(id) else {
            return Vec::new();
        };

        let rooms: Vec<DocumentId> = entry.rooms.into_iter().collect();
        for doc in &rooms {
            self.remove_member(doc, id);
        }
        debug!(client = %id, "Connection unregistered");
        rooms
    }

    pub fn identity(&self, id: &ConnectionId) -> Option<Identity> {
        self.connections.get(id).map(|e| e.identity.clone())
    }

    pub fn is_registered(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Add a connection to a document room. Returns false if the
    /// connection is unknown.
    pub fn join_room(&self, id: &ConnectionId, doc: &DocumentId) -> bool {
        let Some(mut entry) = self.connections.get_mut(id) else {
            return false;
        };
        entry.rooms.insert(doc.clone());
        drop(entry);

        self.rooms.entry(doc.clone()).or_default().insert(*id);
        true
    }

    /// Remove a connection from a document room. Returns whether it was
    /// a member.
    pub fn leave_room(&self, id: &ConnectionId, doc: &DocumentId) -> bool {
        if let Some(mut entry) = self.connections.get_mut(id) {
            entry.rooms.remove(doc);
        }
        self.remove_member(doc, id)
    }

    /// Connection ids currently joined to a document room.
    pub fn members(&self, doc: &DocumentId) -> Vec<ConnectionId> {
        self.rooms
            .get(doc)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, doc: &DocumentId) -> usize {
        self.rooms.get(doc).map(|set| set.len()).unwrap_or(0)
    }

    /// Connections in a room whose identity maps to the given presence key.
    pub fn members_for_participant(
        &self,
        doc: &DocumentId,
        key: &crate::identity::ParticipantKey,
    ) -> Vec<ConnectionId> {
        self.members(doc)
            .into_iter()
            .filter(|id| {
                self.connections
                    .get(id)
                    .is_some_and(|e| e.identity.participant_key() == *key)
            })
            .collect()
    }

    /// Send a payload to one connection.
    ///
    /// Returns false when the connection is unknown or its channel has
    /// closed; the caller decides whether to prune.
    pub fn send(&self, id: &ConnectionId, payload: Payload) -> bool {
        match self.connections.get(id) {
            Some(entry) => entry.sender.send(payload).is_ok(),
            None => false,
        }
    }

    fn remove_member(&self, doc: &DocumentId, id: &ConnectionId) -> bool {
        let Some(mut set) = self.rooms.get_mut(doc) else {
            return false;
        };
        let removed = set.remove(id);
        let now_empty = set.is_empty();
        drop(set);
        if now_empty {
            self.rooms.remove_if(doc, |_, set| set.is_empty());
        }
        removed
    }
}
