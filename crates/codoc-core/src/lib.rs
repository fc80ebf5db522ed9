//! codoc Core - collaboration session management
//!
//! This crate provides the shared state behind every connection:
//! - Connection registry with per-room membership
//! - Presence registry with heartbeat-based liveness
//! - Room broadcaster (fan-out over injected send capabilities)
//! - Document instance cache over an external byte store

pub mod broadcast;
pub mod cache;
pub mod connection;
pub mod document;
pub mod engine;
pub mod error;
pub mod hub;
pub mod identity;
pub mod presence;

pub use broadcast::Broadcaster;
pub use cache::DocumentCache;
pub use connection::{ConnectionId, ConnectionRegistry, Payload};
pub use document::DocumentId;
pub use engine::DocEngine;
pub use error::{Error, Result};
pub use hub::Hub;
pub use identity::{Identity, ParticipantKey, GUEST_AVATAR_COLOR};
pub use presence::{CursorPos, Participant, PresenceRegistry};
