//! codoc wire protocol
//!
//! Two channels share each persistent connection:
//!
//! - the **sync channel** carries binary frames, one per message, first
//!   byte = type tag (see [`frame`]); any unrecognized tag means the
//!   whole message is raw CRDT update bytes, relayed verbatim.
//! - the **control channel** carries JSON-encoded room events (join,
//!   leave, cursor, typing, heartbeat) as `{"event": ..., "data": ...}`
//!   envelopes (see [`event`]).

pub mod error;
pub mod event;
pub mod frame;

pub use error::{ProtocolError, ProtocolResult};
pub use event::{
    snapshot_payload, ClientEvent, DepartureReason, ParticipantInfo, PresenceChange,
    PresenceEntry, ServerEvent,
};
pub use frame::{Frame, MAX_FRAME_SIZE};
