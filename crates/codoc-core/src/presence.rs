//! Presence registry - who is in each document room, and where

use crate::document::DocumentId;
use crate::identity::{Identity, ParticipantKey};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Cursor position inside a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPos {
    pub anchor: i64,
    pub head: i64,
}

/// One presence entry in a document room.
#[derive(Debug, Clone)]
pub struct Participant {
    pub display_name: String,
    pub avatar_color: String,
    /// Admin flag; `None` for guests.
    pub is_admin: Option<bool>,
    pub is_guest: bool,
    pub position: CursorPos,
    /// Wall-clock millis of the last join/cursor change, for payloads.
    pub updated_at: u64,
    /// Monotonic instant of the last heartbeat, for liveness only.
    pub last_heartbeat: Instant,
}

impl Participant {
    fn from_identity(identity: &Identity) -> Self {
        Self {
            display_name: identity.display_name(),
            avatar_color: identity.avatar_color().to_string(),
            is_admin: identity.is_admin(),
            is_guest: identity.is_guest(),
            position: CursorPos::default(),
            updated_at: now_millis(),
            last_heartbeat: Instant::now(),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Per-document map of participants.
///
/// One map entry per document room; all mutation for a given document
/// serializes on that entry's shard lock, so unrelated rooms never
/// contend. An entry exists only while the room has participants.
#[derive(Default)]
pub struct PresenceRegistry {
    rooms: DashMap<DocumentId, HashMap<ParticipantKey, Participant>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a participant and return the room's full
    /// presence map for the joiner's initial sync.
    ///
    /// Overwriting an existing key is a reconnect, not a duplicate-join
    /// fault: the entry gets fresh cursor and heartbeat state.
    pub fn join(
        &self,
        doc: &DocumentId,
        identity: &Identity,
    ) -> HashMap<ParticipantKey, Participant> {
        let key = identity.participant_key();
        let mut room = self.rooms.entry(doc.clone()).or_default();
        room.insert(key, Participant::from_identity(identity));
        debug!(doc = %doc, participant = %key, "Presence: joined");
        room.clone()
    }

    /// Remove a participant. Returns the removed entry, or `None` if it
    /// was already gone (disconnect races are tolerated).
    pub fn leave(&self, doc: &DocumentId, key: &ParticipantKey) -> Option<Participant> {
        let mut room = self.rooms.get_mut(doc)?;
        let removed = room.remove(key);
        let now_empty = room.is_empty();
        drop(room);
        if now_empty {
            self.rooms.remove_if(doc, |_, room| room.is_empty());
        }
        if removed.is_some() {
            debug!(doc = %doc, participant = %key, "Presence: left");
        }
        removed
    }

    /// Overwrite a participant's cursor. No-op if the entry is absent
    /// (e.g. a cursor frame arrived after leave).
    pub fn update_cursor(&self, doc: &DocumentId, key: &ParticipantKey, position: CursorPos) -> bool {
        let Some(mut room) = self.rooms.get_mut(doc) else {
            return false;
        };
        match room.get_mut(key) {
            Some(participant) => {
                participant.position = position;
                participant.updated_at = now_millis();
                participant.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Refresh a participant's heartbeat. No-op if absent.
    pub fn heartbeat(&self, doc: &DocumentId, key: &ParticipantKey) -> bool {
        let Some(mut room) = self.rooms.get_mut(doc) else {
            return false;
        };
        match room.get_mut(key) {
            Some(participant) => {
                participant.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Current presence map for a document (empty if no room).
    pub fn snapshot(&self, doc: &DocumentId) -> HashMap<ParticipantKey, Participant> {
        self.rooms
            .get(doc)
            .map(|room| room.clone())
            .unwrap_or_default()
    }

    pub fn is_empty(&self, doc: &DocumentId) -> bool {
        self.rooms.get(doc).map_or(true, |room| room.is_empty())
    }

    pub fn contains(&self, doc: &DocumentId, key: &ParticipantKey) -> bool {
        self.rooms
            .get(doc)
            .is_some_and(|room| room.contains_key(key))
    }

    /// Remove and return every participant whose last heartbeat is
    /// older than `timeout`. The sole eviction path besides explicit
    /// leave.
    pub fn sweep_expired(
        &self,
        now: Instant,
        timeout: Duration,
    ) -> Vec<(DocumentId, ParticipantKey, Participant)> {
        let mut evicted = Vec::new();

        for mut room in self.rooms.iter_mut() {
            let doc = room.key().clone();
            let expired: Vec<ParticipantKey> = room
                .iter()
                .filter(|(_, p)| now.saturating_duration_since(p.last_heartbeat) > timeout)
                .map(|(key, _)| *key)
                .collect();

            for key in expired {
                if let Some(participant) = room.remove(&key) {
                    debug!(doc = %doc, participant = %key, "Presence: evicted on timeout");
                    evicted.push((doc.clone(), key, participant));
                }
            }
        }

        // Drop room entries that emptied out during the sweep
        self.rooms.retain(|_, room| !room.is_empty());

        evicted
    }
}
