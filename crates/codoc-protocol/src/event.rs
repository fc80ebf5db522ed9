//! Control-channel room events
//!
//! JSON envelopes of the form `{"event": "cursor:move", "data": {...}}`.
//! Event names and payload shapes follow the room protocol: joins and
//! leaves name a documentId, cursors carry `{anchor, head}`, presence
//! snapshots map participant keys to display info.

use crate::error::{ProtocolError, ProtocolResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use codoc_core::{CursorPos, Participant, ParticipantKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Join a document room. An optional base64 state vector lets a
    /// reconnecting client ask for a minimal catch-up in the same step.
    #[serde(rename = "document:join", rename_all = "camelCase")]
    Join {
        document_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state_vector: Option<String>,
    },

    #[serde(rename = "document:leave", rename_all = "camelCase")]
    Leave { document_id: String },

    #[serde(rename = "cursor:move", rename_all = "camelCase")]
    CursorMove {
        document_id: String,
        position: CursorPos,
    },

    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart { document_id: String },

    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop { document_id: String },

    /// Heartbeat keeping the sender's presence entry alive.
    #[serde(rename = "presence:ping", rename_all = "camelCase")]
    Ping { document_id: String },
}

impl ClientEvent {
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        serde_json::from_str(json).map_err(|e| ProtocolError::InvalidEvent(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode a base64 state vector carried in a join event.
    pub fn decode_state_vector(encoded: &str) -> ProtocolResult<Vec<u8>> {
        BASE64
            .decode(encoded)
            .map_err(|e| ProtocolError::InvalidStateVector(e.to_string()))
    }

    pub fn encode_state_vector(raw: &[u8]) -> String {
        BASE64.encode(raw)
    }
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full presence snapshot, sent to a joiner (and in reply to an
    /// awareness query).
    #[serde(rename = "presence:init", rename_all = "camelCase")]
    PresenceInit {
        document_id: String,
        participants: BTreeMap<String, PresenceEntry>,
    },

    /// Someone joined or left the room.
    #[serde(rename = "presence:update", rename_all = "camelCase")]
    PresenceUpdate {
        document_id: String,
        #[serde(rename = "type")]
        kind: PresenceChange,
        participant: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        info: Option<ParticipantInfo>,
        is_guest: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<DepartureReason>,
    },

    #[serde(rename = "cursor:move", rename_all = "camelCase")]
    CursorMove {
        document_id: String,
        participant: String,
        info: ParticipantInfo,
        position: CursorPos,
        timestamp: u64,
    },

    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart {
        document_id: String,
        participant: String,
        info: ParticipantInfo,
    },

    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop {
        document_id: String,
        participant: String,
        info: ParticipantInfo,
    },

    /// Explicit error naming the rejected operation.
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        serde_json::from_str(json).map_err(|e| ProtocolError::InvalidEvent(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceChange {
    #[serde(rename = "user_joined")]
    Joined,
    #[serde(rename = "user_left")]
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepartureReason {
    #[serde(rename = "timeout")]
    Timeout,
}

/// Display info for one participant, as carried in announcements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub display_name: String,
    pub avatar_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
}

impl From<&Participant> for ParticipantInfo {
    fn from(p: &Participant) -> Self {
        Self {
            display_name: p.display_name.clone(),
            avatar_color: p.avatar_color.clone(),
            is_admin: p.is_admin,
        }
    }
}

/// One presence-snapshot entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub display_name: String,
    pub avatar_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    pub is_guest: bool,
    pub position: CursorPos,
    pub last_timestamp: u64,
}

impl From<&Participant> for PresenceEntry {
    fn from(p: &Participant) -> Self {
        Self {
            display_name: p.display_name.clone(),
            avatar_color: p.avatar_color.clone(),
            is_admin: p.is_admin,
            is_guest: p.is_guest,
            position: p.position,
            last_timestamp: p.updated_at,
        }
    }
}

/// Convert a presence map into its wire form, keyed by the string form
/// of each participant key.
pub fn snapshot_payload(
    snapshot: &HashMap<ParticipantKey, Participant>,
) -> BTreeMap<String, PresenceEntry> {
    snapshot
        .iter()
        .map(|(key, participant)| (key.to_string(), PresenceEntry::from(participant)))
        .collect()
}
